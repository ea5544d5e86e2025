//! Client actors.
//!
//! A client loads its data partition, waits for a bootstrap message, then
//! trains whenever the server hands it a model and reports back. No learning
//! math happens here; training is a virtual-time cost shaped by the host
//! speed, the configured per-step or per-epoch cost, the straggler
//! multiplier folded in at spawn time, and the control-flag noise.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

use feddes_common::{Control, Error, Result};
use feddes_des::{HostCtx, Inbox, Outbox};

use crate::compass::ServerEvent;

/// Standard deviation of the control-flag noise distribution.
pub const NOISE_STD: f64 = 0.12;

/// Parameters of a FedAvg client actor.
#[derive(Debug, Clone)]
pub struct FedAvgClientParams {
    /// Client id, also its inbox name.
    pub client_id: usize,
    /// Number of synchronous rounds to take part in.
    pub rounds: u64,
    /// Data loading cost (straggler multiplier already applied).
    pub dataloader_cost: f64,
    /// Per-epoch training cost (multipliers already applied).
    pub training_cost: f64,
    /// Noise control flag.
    pub control: Control,
    /// Seed the per-client PRNG derives from.
    pub run_seed: u64,
}

/// Parameters of a FedCompass client actor.
#[derive(Debug, Clone)]
pub struct CompassClientParams {
    /// Client id, also its inbox name.
    pub client_id: usize,
    /// Data loading cost (straggler multiplier already applied).
    pub dataloader_cost: f64,
    /// Per-local-step training cost (multipliers already applied).
    pub step_training_cost: f64,
    /// Noise control flag.
    pub control: Control,
    /// Seed the per-client PRNG derives from.
    pub run_seed: u64,
}

/// Deterministic per-client PRNG derived from `(run_seed, client_id)`.
fn client_rng(run_seed: u64, client_id: usize) -> StdRng {
    let stream = (client_id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    StdRng::seed_from_u64(run_seed.wrapping_add(stream))
}

fn noise() -> Result<Normal<f64>> {
    Normal::new(0.0, NOISE_STD).map_err(|e| Error::Simulation(e.to_string()))
}

/// Runs one FedAvg client: bootstrap, then `rounds` receive/train/reply
/// iterations.
pub async fn run_fedavg_client(
    ctx: HostCtx,
    params: FedAvgClientParams,
    mut inbox: Inbox<f64>,
    server: Outbox<usize>,
) -> Result<()> {
    let mut rng = client_rng(params.run_seed, params.client_id);
    let dist = noise()?;

    let mut speed = ctx.speed();
    if params.control.perturbs_host() {
        speed *= 1.0 + dist.sample(&mut rng);
    }
    debug!(client = params.client_id, host = %ctx.name(), speed, "client starting");

    ctx.compute(params.dataloader_cost * speed).await;

    let comm_cost = inbox.get().await?;
    for round in 0..params.rounds {
        inbox.get().await?;
        debug!(
            client = params.client_id,
            round = round + 1,
            "received global model from server"
        );
        let mut training = params.training_cost * speed;
        if params.control.perturbs_training() {
            training *= 1.0 + dist.sample(&mut rng);
        }
        ctx.compute(training).await;
        server.put(params.client_id, comm_cost * 32.0).await?;
        debug!(client = params.client_id, round = round + 1, "sent local model");
    }
    Ok(())
}

/// Runs one FedCompass client: bootstrap with the model size, then train for
/// each prescribed step count until the stop sentinel arrives.
pub async fn run_compass_client(
    ctx: HostCtx,
    params: CompassClientParams,
    mut inbox: Inbox<i64>,
    server: Outbox<ServerEvent>,
) -> Result<()> {
    let mut rng = client_rng(params.run_seed, params.client_id);
    let dist = noise()?;

    let mut speed = ctx.speed();
    if params.control.perturbs_host() {
        speed *= 1.0 + dist.sample(&mut rng);
    }
    debug!(client = params.client_id, host = %ctx.name(), speed, "client starting");

    ctx.compute(params.dataloader_cost * speed).await;

    let model_size = inbox.get().await? as f64;
    loop {
        let local_steps = inbox.get().await?;
        if local_steps < 0 {
            info!(client = params.client_id, "finished all epochs, terminating");
            break;
        }
        debug!(
            client = params.client_id,
            steps = local_steps,
            "received global model from server"
        );
        let mut training = params.step_training_cost * local_steps as f64 * speed;
        if params.control.perturbs_training() {
            training *= 1.0 + dist.sample(&mut rng);
        }
        ctx.compute(training).await;
        server
            .put(
                ServerEvent::LocalUpdate {
                    client: params.client_id,
                },
                model_size,
            )
            .await?;
        debug!(client = params.client_id, steps = local_steps, "sent local model");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_rngs_are_deterministic_and_distinct() {
        use rand::Rng;

        let a: u64 = client_rng(7, 0).gen();
        let b: u64 = client_rng(7, 0).gen();
        assert_eq!(a, b);

        let c: u64 = client_rng(7, 1).gen();
        let d: u64 = client_rng(8, 0).gen();
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn noise_distribution_is_constructible() {
        let dist = noise().unwrap();
        let mut rng = client_rng(0, 0);
        // A (1 + X) factor with X ~ N(0, 0.12) stays near 1.
        let sample = 1.0 + dist.sample(&mut rng);
        assert!(sample > 0.0 && sample < 2.0);
    }
}
