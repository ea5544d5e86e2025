//! Virtual clock, hosts and the simulation handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use feddes_common::Result;

use crate::mailbox::{Inbox, MailboxRegistry, Outbox};
use crate::platform::{HostSpec, Platform};

/// Advances virtual time by `seconds`.
///
/// Non-positive and non-finite durations complete immediately, so cost
/// formulas may feed this without clamping.
pub async fn hold(seconds: f64) {
    if seconds > 0.0 && seconds.is_finite() {
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }
}

/// Handle to one simulation run: the platform, the virtual-time origin and
/// the mailbox registry.
///
/// Must be created inside the paused-clock runtime; `now()` is measured from
/// the creation instant.
#[derive(Clone)]
pub struct Simulation {
    platform: Arc<Platform>,
    origin: Instant,
    mailboxes: MailboxRegistry,
}

impl Simulation {
    /// Creates a simulation over a validated platform.
    pub fn new(platform: Platform) -> Self {
        Self {
            platform: Arc::new(platform),
            origin: Instant::now(),
            mailboxes: MailboxRegistry::new(),
        }
    }

    /// The platform this simulation runs on.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Current virtual time in seconds since the simulation started.
    pub fn now(&self) -> f64 {
        (Instant::now() - self.origin).as_secs_f64()
    }

    /// Returns the execution context for an actor placed on `name`.
    pub fn host(&self, name: &str) -> Result<HostCtx> {
        let spec = self.platform.host(name)?.clone();
        Ok(HostCtx {
            spec,
            sim: self.clone(),
        })
    }

    /// Raw sender for a named mailbox, bypassing the link model.
    ///
    /// Used for local notifications (timer expiries) that are not network
    /// messages and must not pay transfer costs.
    pub fn sender<T>(&self, name: &str) -> Result<mpsc::UnboundedSender<T>>
    where
        T: Send + 'static,
    {
        self.mailboxes.sender(name)
    }
}

/// Per-actor execution context: the host the actor runs on plus the
/// simulation handle.
#[derive(Clone)]
pub struct HostCtx {
    spec: HostSpec,
    sim: Simulation,
}

impl HostCtx {
    /// Host name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Host compute speed in FLOPS.
    pub fn speed(&self) -> f64 {
        self.spec.speed
    }

    /// Current virtual time in seconds since the simulation started.
    pub fn now(&self) -> f64 {
        self.sim.now()
    }

    /// Performs `flops` of work on this host, advancing virtual time by
    /// `flops / speed` seconds.
    pub async fn compute(&self, flops: f64) {
        hold(flops / self.spec.speed).await;
    }

    /// Sleeps for `seconds` of virtual time.
    pub async fn sleep(&self, seconds: f64) {
        hold(seconds).await;
    }

    /// Opens the sending end of mailbox `name`, priced over the link from
    /// this host to `dest_host`.
    pub fn outbox<T>(&self, name: &str, dest_host: &str) -> Result<Outbox<T>>
    where
        T: Send + 'static,
    {
        let cost = self.sim.platform.route(&self.spec.name, dest_host)?;
        let tx = self.sim.mailboxes.sender::<T>(name)?;
        Ok(Outbox::new(name.to_string(), tx, cost))
    }

    /// Claims the receiving end of mailbox `name` for this actor.
    pub fn inbox<T>(&self, name: &str) -> Result<Inbox<T>>
    where
        T: Send + 'static,
    {
        let rx = self.sim.mailboxes.receiver::<T>(name)?;
        Ok(Inbox::new(name.to_string(), rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_platform() -> Platform {
        Platform::full_mesh(2, 1e9, 1.25e8, 1e-4)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn clock_starts_at_zero_and_tracks_sleep() {
        let sim = Simulation::new(test_platform());
        assert_eq!(sim.now(), 0.0);
        let host = sim.host("Node-1").unwrap();
        host.sleep(2.5).await;
        assert!((sim.now() - 2.5).abs() < 1e-9);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn compute_scales_with_host_speed() {
        let sim = Simulation::new(test_platform());
        let host = sim.host("Node-2").unwrap();
        host.compute(5e8).await; // 5e8 flops at 1e9 FLOPS = 0.5s
        assert!((sim.now() - 0.5).abs() < 1e-9);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn hold_ignores_degenerate_durations() {
        let sim = Simulation::new(test_platform());
        hold(0.0).await;
        hold(-1.0).await;
        hold(f64::NAN).await;
        assert_eq!(sim.now(), 0.0);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unknown_host_is_rejected() {
        let sim = Simulation::new(test_platform());
        assert!(sim.host("Node-5").is_err());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn actors_exchange_messages_across_hosts() {
        // Millisecond-aligned latency: the runtime's timers fire on
        // millisecond boundaries.
        let sim = Simulation::new(Platform::full_mesh(2, 1e9, 1.25e8, 1e-3));
        let alice = sim.host("Node-1").unwrap();
        let bob = sim.host("Node-2").unwrap();

        let outbox = alice.outbox::<u64>("bob", "Node-2").unwrap();
        let mut inbox = bob.inbox::<u64>("bob").unwrap();

        let sender = tokio::spawn(async move {
            outbox.put(99, 1.25e8).await.unwrap(); // 1s of payload + latency
        });
        let value = inbox.get().await.unwrap();
        sender.await.unwrap();

        assert_eq!(value, 99);
        assert!((sim.now() - (1.0 + 1e-3)).abs() < 1e-9);
    }
}
