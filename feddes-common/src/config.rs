//! Simulation configuration.
//!
//! Configurations are JSON documents, accepted either as a file path or as an
//! inline JSON literal on the command line. [`CommonConfig`] carries the keys
//! shared by both algorithms; [`CompassConfig`] flattens it and adds the
//! FedCompass scheduler keys.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::straggler::{client_effects, StragglerRule};

/// Default `q_ratio` when the config omits it.
pub const DEFAULT_Q_RATIO: f64 = 0.2;
/// Default `lambda` when the config omits it.
pub const DEFAULT_LAMBDA: f64 = 1.5;

/// Noise control flag.
///
/// Selects how much randomness perturbs the simulated clients: none, noisy
/// per-round training time, or additionally a noisy host speed drawn once at
/// client startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Control {
    /// Fully deterministic run (flag 0).
    #[default]
    Deterministic,
    /// Per-round noisy training time (flag 1).
    NoisyTraining,
    /// Noisy training time plus a one-shot noisy host speed (flag 2).
    NoisyHost,
}

impl Control {
    /// Whether training durations receive a per-round noise factor.
    pub fn perturbs_training(self) -> bool {
        self != Control::Deterministic
    }

    /// Whether the host speed receives a one-shot noise factor at startup.
    pub fn perturbs_host(self) -> bool {
        self == Control::NoisyHost
    }
}

impl TryFrom<u8> for Control {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Control::Deterministic),
            1 => Ok(Control::NoisyTraining),
            2 => Ok(Control::NoisyHost),
            _ => Err(format!("\"control\" must be 0, 1 or 2 (got {value})")),
        }
    }
}

impl From<Control> for u8 {
    fn from(value: Control) -> Self {
        match value {
            Control::Deterministic => 0,
            Control::NoisyTraining => 1,
            Control::NoisyHost => 2,
        }
    }
}

/// Configuration keys shared by FedAvg and FedCompass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonConfig {
    /// Number of platform nodes.
    pub num_nodes: u32,
    /// Client slots per node; the server consumes one slot on Node-1.
    pub clients_per_node: u32,
    /// Number of global epochs (FedAvg rounds / FedCompass scheduler ticks).
    pub epochs: u64,
    /// Virtual-time cost of data loading and partitioning.
    pub dataloader_cost: f64,
    /// Virtual-time cost of aggregation (carried for config parity; the
    /// per-phase server costs are fixed constants of the algorithms).
    pub aggregation_cost: f64,
    /// Virtual-time cost of local training (per epoch for FedAvg, per local
    /// step for FedCompass).
    pub training_cost: f64,
    /// Communication cost unit used to size FedAvg transfers.
    pub comm_cost: f64,
    /// Noise control flag.
    #[serde(default)]
    pub control: Control,
    /// Seed from which every client derives its own deterministic PRNG.
    #[serde(default)]
    pub run_seed: u64,
    /// Straggler rules; empty means no stragglers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stragglers: Vec<StragglerRule>,
}

impl CommonConfig {
    /// Total simulated clients: one slot per node pair minus the server slot.
    pub fn total_clients(&self) -> usize {
        (self.num_nodes as usize) * (self.clients_per_node as usize) - 1
    }

    /// Validates the shared keys.
    pub fn validate(&self) -> Result<()> {
        if self.num_nodes < 1 {
            return Err(Error::Config("\"num_nodes\" must be at least 1".into()));
        }
        if self.clients_per_node < 1 {
            return Err(Error::Config(
                "\"clients_per_node\" must be at least 1".into(),
            ));
        }
        if (self.num_nodes as u64) * (self.clients_per_node as u64) < 2 {
            return Err(Error::Config(
                "\"num_nodes\" x \"clients_per_node\" must leave at least one \
                 client after the server slot"
                    .into(),
            ));
        }
        for (key, value) in [
            ("dataloader_cost", self.dataloader_cost),
            ("aggregation_cost", self.aggregation_cost),
            ("training_cost", self.training_cost),
            ("comm_cost", self.comm_cost),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Config(format!(
                    "\"{key}\" must be a non-negative finite number (got {value})"
                )));
            }
        }
        // Straggler rules are checked against the client count eagerly so a
        // bad rule aborts at load time, not at spawn time.
        client_effects(&self.stragglers, self.total_clients())?;
        Ok(())
    }

    /// Resolves the straggler rules into the per-client multiplier map.
    pub fn client_effects(&self) -> Result<BTreeMap<usize, f64>> {
        client_effects(&self.stragglers, self.total_clients())
    }
}

/// FedCompass configuration: the shared keys plus the scheduler keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompassConfig {
    /// Shared keys.
    #[serde(flatten)]
    pub common: CommonConfig,
    /// Maximum local steps assigned per round (`M`).
    pub max_local_steps: i64,
    /// Minimum-step ratio `q` in (0, 1].
    #[serde(default = "default_q_ratio")]
    pub q_ratio: f64,
    /// Latest-arrival factor `lambda`, at least 1.
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Virtual-time cost of validation (carried for config parity).
    #[serde(default)]
    pub validation_cost: f64,
    /// Whether the server validates after every scheduler tick (0/1).
    #[serde(default)]
    pub validation_flag: u8,
    /// Model size in bytes, used to price model transfers.
    pub model_size: f64,
}

fn default_q_ratio() -> f64 {
    DEFAULT_Q_RATIO
}

fn default_lambda() -> f64 {
    DEFAULT_LAMBDA
}

impl CompassConfig {
    /// Whether per-tick validation is enabled.
    pub fn validation_enabled(&self) -> bool {
        self.validation_flag != 0
    }

    /// Validates the shared and scheduler keys.
    pub fn validate(&self) -> Result<()> {
        self.common.validate()?;
        if self.common.epochs < 1 {
            // The scheduler loop ticks before checking the epoch target, so a
            // zero-epoch run would never reach its termination condition.
            return Err(Error::Config("\"epochs\" must be at least 1".into()));
        }
        if self.max_local_steps < 1 {
            return Err(Error::Config(format!(
                "\"max_local_steps\" must be at least 1 (got {})",
                self.max_local_steps
            )));
        }
        if !(self.q_ratio > 0.0 && self.q_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "\"q_ratio\" must lie in (0, 1] (got {})",
                self.q_ratio
            )));
        }
        if !(self.lambda >= 1.0) {
            return Err(Error::Config(format!(
                "\"lambda\" must be at least 1 (got {})",
                self.lambda
            )));
        }
        if self.validation_flag > 1 {
            return Err(Error::Config(format!(
                "\"validation_flag\" must be 0 or 1 (got {})",
                self.validation_flag
            )));
        }
        if !self.validation_cost.is_finite() || self.validation_cost < 0.0 {
            return Err(Error::Config(format!(
                "\"validation_cost\" must be a non-negative finite number (got {})",
                self.validation_cost
            )));
        }
        if !self.model_size.is_finite() || self.model_size < 0.0 {
            return Err(Error::Config(format!(
                "\"model_size\" must be a non-negative finite number (got {})",
                self.model_size
            )));
        }
        Ok(())
    }
}

/// Loads a configuration from a file path or an inline JSON literal.
///
/// The argument is tried as a path first; when no such file exists it is
/// parsed as a JSON document itself.
pub fn load<T: DeserializeOwned>(arg: &str) -> Result<T> {
    let path = Path::new(arg);
    if path.is_file() {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("failed to parse config file {arg}: {e}"))
        })
    } else {
        serde_json::from_str(arg).map_err(|e| {
            Error::Config(format!("failed to parse config JSON string: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common_json() -> &'static str {
        r#"{
            "num_nodes": 2,
            "clients_per_node": 2,
            "epochs": 2,
            "dataloader_cost": 1.0,
            "aggregation_cost": 1.0,
            "training_cost": 1.0,
            "comm_cost": 1.0,
            "control": 0
        }"#
    }

    #[test]
    fn parses_common_config() {
        let cfg: CommonConfig = load(common_json()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.total_clients(), 3);
        assert_eq!(cfg.control, Control::Deterministic);
        assert!(cfg.stragglers.is_empty());
        assert_eq!(cfg.run_seed, 0);
    }

    #[test]
    fn parses_compass_config_with_defaults() {
        let json = r#"{
            "num_nodes": 2,
            "clients_per_node": 3,
            "epochs": 5,
            "dataloader_cost": 1.0,
            "aggregation_cost": 1.0,
            "training_cost": 0.5,
            "comm_cost": 1.0,
            "max_local_steps": 10,
            "model_size": 4096
        }"#;
        let cfg: CompassConfig = load(json).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.common.total_clients(), 5);
        assert_eq!(cfg.q_ratio, DEFAULT_Q_RATIO);
        assert_eq!(cfg.lambda, DEFAULT_LAMBDA);
        assert_eq!(cfg.validation_cost, 0.0);
        assert!(!cfg.validation_enabled());
    }

    #[test]
    fn canonical_round_trip_is_identity() {
        let json = r#"{
            "num_nodes": 3,
            "clients_per_node": 4,
            "epochs": 7,
            "dataloader_cost": 1.5,
            "aggregation_cost": 0.25,
            "training_cost": 0.75,
            "comm_cost": 2.0,
            "control": 2,
            "run_seed": 42,
            "stragglers": [
                {"effect": 2.0, "range": [0, 4]},
                {"effect": 3.0, "clients": [2, 3]}
            ],
            "max_local_steps": 20,
            "q_ratio": 0.25,
            "lambda": 1.2,
            "validation_cost": 0.1,
            "validation_flag": 1,
            "model_size": 1024
        }"#;
        let cfg: CompassConfig = load(json).unwrap();
        let canonical = serde_json::to_string(&cfg).unwrap();
        let reparsed: CompassConfig = load(&canonical).unwrap();
        assert_eq!(cfg, reparsed);
        assert_eq!(
            cfg.common.client_effects().unwrap(),
            reparsed.common.client_effects().unwrap()
        );
    }

    #[test]
    fn loads_from_file_path() {
        let dir = std::env::temp_dir();
        let path = dir.join("feddes-config-test.json");
        std::fs::write(&path, common_json()).unwrap();
        let cfg: CommonConfig = load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.epochs, 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rejects_invalid_control() {
        let json = common_json().replace("\"control\": 0", "\"control\": 3");
        assert!(load::<CommonConfig>(&json).is_err());
    }

    #[test]
    fn rejects_bad_scheduler_bounds() {
        let base = r#"{
            "num_nodes": 2, "clients_per_node": 2, "epochs": 2,
            "dataloader_cost": 1.0, "aggregation_cost": 1.0,
            "training_cost": 1.0, "comm_cost": 1.0,
            "max_local_steps": %M%, "q_ratio": %Q%, "lambda": %L%,
            "model_size": 64
        }"#;
        let build = |m: &str, q: &str, l: &str| -> CompassConfig {
            load(
                &base
                    .replace("%M%", m)
                    .replace("%Q%", q)
                    .replace("%L%", l),
            )
            .unwrap()
        };
        assert!(build("10", "0.2", "1.5").validate().is_ok());
        assert!(build("0", "0.2", "1.5").validate().is_err());
        assert!(build("10", "0.0", "1.5").validate().is_err());
        assert!(build("10", "1.5", "1.5").validate().is_err());
        assert!(build("10", "0.2", "0.9").validate().is_err());
    }

    #[test]
    fn rejects_degenerate_topology() {
        let json = common_json()
            .replace("\"num_nodes\": 2", "\"num_nodes\": 1")
            .replace("\"clients_per_node\": 2", "\"clients_per_node\": 1");
        let cfg: CommonConfig = load(&json).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validates_straggler_rules_at_load() {
        let json = common_json().replace(
            "\"control\": 0",
            "\"control\": 0, \"stragglers\": [{\"effect\": 2.0, \"client\": 99}]",
        );
        let cfg: CommonConfig = load(&json).unwrap();
        assert!(cfg.validate().is_err());
    }
}
