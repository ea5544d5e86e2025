//! Platform description: hosts, links and route resolution.
//!
//! A platform is loaded from a YAML file:
//!
//! ```yaml
//! hosts:
//!   - { name: Node-1, speed: 2.445e9 }
//!   - { name: Node-2, speed: 2.445e9 }
//! links:
//!   - { src: Node-1, dst: Node-2, bandwidth: 1.25e8, latency: 1.0e-4 }
//! default_link: { bandwidth: 1.25e8, latency: 1.0e-4 }
//! ```
//!
//! Links are symmetric. Pairs without an explicit link fall back to
//! `default_link`; a pair with neither is a fatal platform error. Transfers
//! between an actor and itself are free unless a self-link is declared.

use serde::{Deserialize, Serialize};

use feddes_common::{Error, Result};

/// A compute host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    /// Host name, referenced by actor placement (e.g. `Node-1`).
    pub name: String,
    /// Compute speed in FLOPS.
    pub speed: f64,
}

/// A link between two hosts. Links are symmetric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// One endpoint.
    pub src: String,
    /// Other endpoint.
    pub dst: String,
    /// Bandwidth in bytes per second.
    pub bandwidth: f64,
    /// Latency in seconds.
    pub latency: f64,
}

/// Resolved transfer cost between two hosts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkCost {
    /// Bandwidth in bytes per second.
    pub bandwidth: f64,
    /// Latency in seconds.
    pub latency: f64,
}

impl LinkCost {
    /// Zero-cost loopback.
    pub const LOOPBACK: LinkCost = LinkCost {
        bandwidth: f64::INFINITY,
        latency: 0.0,
    };

    /// Virtual-time cost of transferring `bytes` over this link.
    pub fn transfer_time(&self, bytes: f64) -> f64 {
        let payload = if self.bandwidth > 0.0 && self.bandwidth.is_finite() {
            bytes / self.bandwidth
        } else {
            0.0
        };
        self.latency + payload
    }
}

/// The simulated platform: hosts plus the routing graph between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Declared hosts.
    pub hosts: Vec<HostSpec>,
    /// Explicit links between host pairs.
    #[serde(default)]
    pub links: Vec<LinkSpec>,
    /// Fallback link for pairs without an explicit link.
    #[serde(default)]
    pub default_link: Option<LinkCost>,
}

impl Platform {
    /// Loads and validates a platform from a YAML file.
    pub fn from_path(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Platform(format!("failed to read {path}: {e}")))?;
        let platform: Platform = serde_yaml::from_str(&text)?;
        platform.validate()?;
        Ok(platform)
    }

    /// Builds a full-mesh platform of `num_nodes` uniform hosts named
    /// `Node-1` through `Node-N`, mirroring the cluster generator the
    /// simulator is usually run against.
    pub fn full_mesh(num_nodes: u32, speed: f64, bandwidth: f64, latency: f64) -> Self {
        let hosts = (1..=num_nodes)
            .map(|i| HostSpec {
                name: format!("Node-{i}"),
                speed,
            })
            .collect();
        Platform {
            hosts,
            links: Vec::new(),
            default_link: Some(LinkCost { bandwidth, latency }),
        }
    }

    /// Validates host and link definitions.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::Platform("platform defines no hosts".into()));
        }
        for host in &self.hosts {
            if !(host.speed > 0.0) || !host.speed.is_finite() {
                return Err(Error::Platform(format!(
                    "host {} must have a positive finite speed (got {})",
                    host.name, host.speed
                )));
            }
            if self.hosts.iter().filter(|h| h.name == host.name).count() > 1 {
                return Err(Error::Platform(format!(
                    "duplicate host name {}",
                    host.name
                )));
            }
        }
        for link in &self.links {
            for endpoint in [&link.src, &link.dst] {
                if self.host(endpoint).is_err() {
                    return Err(Error::Platform(format!(
                        "link {} -> {} references unknown host {endpoint}",
                        link.src, link.dst
                    )));
                }
            }
            if !(link.bandwidth > 0.0) {
                return Err(Error::Platform(format!(
                    "link {} -> {} must have positive bandwidth",
                    link.src, link.dst
                )));
            }
            if !(link.latency >= 0.0) || !link.latency.is_finite() {
                return Err(Error::Platform(format!(
                    "link {} -> {} must have a non-negative latency",
                    link.src, link.dst
                )));
            }
        }
        Ok(())
    }

    /// Looks up a host by name.
    pub fn host(&self, name: &str) -> Result<&HostSpec> {
        self.hosts
            .iter()
            .find(|h| h.name == name)
            .ok_or_else(|| Error::UnknownHost(name.to_string()))
    }

    /// Resolves the transfer cost between two hosts.
    ///
    /// Explicit links win (in either direction), then `default_link`; a
    /// host talking to itself without a self-link transfers for free.
    pub fn route(&self, src: &str, dst: &str) -> Result<LinkCost> {
        self.host(src)?;
        self.host(dst)?;
        if let Some(link) = self.links.iter().find(|l| {
            (l.src == src && l.dst == dst) || (l.src == dst && l.dst == src)
        }) {
            return Ok(LinkCost {
                bandwidth: link.bandwidth,
                latency: link.latency,
            });
        }
        if src == dst {
            return Ok(LinkCost::LOOPBACK);
        }
        self.default_link.ok_or_else(|| {
            Error::Platform(format!("no route between {src} and {dst}"))
        })
    }
}
