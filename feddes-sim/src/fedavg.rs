//! Synchronous FedAvg driver.
//!
//! Round structure: broadcast one model token to every client, then collect
//! exactly as many replies before moving on. Arrival order within a round is
//! whatever the simulation yields.

use tracing::{debug, info};

use feddes_common::Result;
use feddes_des::{HostCtx, Inbox, Outbox};

use crate::report::RunReport;

/// Per-send aggregation overhead, as a fraction of host speed.
const DISPATCH_COST_FACTOR: f64 = 0.05;
/// Per-reply aggregation overhead, as a fraction of host speed.
const COLLECT_COST_FACTOR: f64 = 0.17;
/// Byte size of the bootstrap handshake message.
const BOOTSTRAP_BYTES: f64 = 4.0;

/// Parameters of the FedAvg server actor.
#[derive(Debug, Clone)]
pub struct FedAvgParams {
    /// Number of clients taking part.
    pub num_clients: usize,
    /// Number of synchronous rounds.
    pub num_epochs: u64,
    /// Data loading cost.
    pub dataloader_cost: f64,
    /// Communication cost unit; transfers are priced as multiples of it.
    pub comm_cost: f64,
}

/// Runs the FedAvg server: bootstrap handshake, then `num_epochs` rounds of
/// broadcast-all / collect-all.
pub async fn run_fedavg_server(
    ctx: HostCtx,
    params: FedAvgParams,
    to_clients: Vec<Outbox<f64>>,
    mut inbox: Inbox<usize>,
) -> Result<RunReport> {
    let speed = ctx.speed();
    info!(host = %ctx.name(), speed, clients = params.num_clients, epochs = params.num_epochs, "server running");

    ctx.compute(params.dataloader_cost * speed).await;

    let mut report = RunReport::default();
    for outbox in &to_clients {
        outbox.put(params.comm_cost, BOOTSTRAP_BYTES).await?;
    }
    report.bootstrap_sent = to_clients.len() as u64;

    for round in 0..params.num_epochs {
        info!(round = round + 1, total = params.num_epochs, "starting epoch");
        for (client, outbox) in to_clients.iter().enumerate() {
            outbox.put(1.0, params.comm_cost * 8.0).await?;
            ctx.compute(DISPATCH_COST_FACTOR * speed).await;
            debug!(client, "sent global model");
        }
        report.models_sent += params.num_clients as u64;

        let mut arrived = 0;
        while arrived < params.num_clients {
            let client = inbox.get().await?;
            ctx.compute(COLLECT_COST_FACTOR * speed).await;
            debug!(client, "received local model");
            arrived += 1;
        }
        report.replies_received += arrived as u64;
    }

    report.global_step = params.num_epochs;
    report.virtual_duration = ctx.now();
    Ok(report)
}
