//! FedCompass: asynchronous group-of-arrival scheduling.
//!
//! The server never waits for the whole cohort. Every arrival feeds a
//! per-client speed estimate; the scheduler forms groups of clients whose
//! prescribed local-step counts should make them finish near the same
//! virtual time, aggregates each group when complete or at its deadline,
//! and immediately hands the arrived clients fresh work.

pub mod scheduler;
pub mod server;

pub use scheduler::{ArrivalGroup, ClientInfo, Scheduler};
pub use server::ServerModel;

use tokio::sync::mpsc;
use tracing::{debug, info};

use feddes_common::config::CompassConfig;
use feddes_common::Result;
use feddes_des::{HostCtx, Inbox, Outbox};

use crate::report::RunReport;

/// Reply-processing cost, as a fraction of host speed.
pub(crate) const RECV_COST_FACTOR: f64 = 0.15;
/// Model-dispatch cost, as a fraction of host speed.
pub(crate) const SEND_COST_FACTOR: f64 = 0.047;
/// Stop-sentinel dispatch cost, as a fraction of host speed.
pub(crate) const STOP_COST_FACTOR: f64 = 0.03;
/// Validation cost, as a fraction of host speed.
pub(crate) const VALIDATION_COST_FACTOR: f64 = 0.1;
/// Byte size of the bootstrap model-size header.
pub(crate) const MODEL_HEADER_BYTES: f64 = 4.0;

/// Messages arriving at the FedCompass server inbox.
///
/// Client replies are network messages priced at the model size; deadline
/// expiries are local timer notifications and transfer for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// A client finished its prescribed local steps.
    LocalUpdate {
        /// The reporting client.
        client: usize,
    },
    /// A group's latest-arrival deadline expired.
    GroupDeadline {
        /// The group whose deadline fired.
        group: usize,
    },
}

/// Parameters of the FedCompass server actor.
#[derive(Debug, Clone)]
pub struct CompassParams {
    /// Number of clients taking part.
    pub num_clients: usize,
    /// Number of global epochs (scheduler ticks) to run.
    pub num_epochs: u64,
    /// Maximum local steps per round (`M`).
    pub max_local_steps: i64,
    /// Minimum-step ratio `q`.
    pub q_ratio: f64,
    /// Latest-arrival factor `lambda`.
    pub lambda: f64,
    /// Data loading cost.
    pub dataloader_cost: f64,
    /// Model size in bytes.
    pub model_size: f64,
    /// Whether the server validates after every tick.
    pub validation_flag: bool,
}

impl CompassParams {
    /// Derives the actor parameters from a validated config.
    pub fn from_config(cfg: &CompassConfig) -> Self {
        Self {
            num_clients: cfg.common.total_clients(),
            num_epochs: cfg.common.epochs,
            max_local_steps: cfg.max_local_steps,
            q_ratio: cfg.q_ratio,
            lambda: cfg.lambda,
            dataloader_cost: cfg.common.dataloader_cost,
            model_size: cfg.model_size,
            validation_flag: cfg.validation_enabled(),
        }
    }
}

/// Runs the FedCompass server: bootstrap broadcast, one scheduler tick per
/// epoch, then the termination drain and the stop sentinels.
pub async fn run_compass_server(
    ctx: HostCtx,
    params: CompassParams,
    to_clients: Vec<Outbox<i64>>,
    mut inbox: Inbox<ServerEvent>,
    notify: mpsc::UnboundedSender<ServerEvent>,
) -> Result<RunReport> {
    let speed = ctx.speed();
    info!(
        host = %ctx.name(),
        speed,
        clients = params.num_clients,
        epochs = params.num_epochs,
        "server running"
    );

    ctx.compute(params.dataloader_cost * speed).await;

    let mut scheduler = Scheduler::new(ctx.clone(), &params, to_clients, notify);
    scheduler.broadcast_initial().await?;

    let mut epoch = 0u64;
    loop {
        debug!(epoch = epoch + 1, total = params.num_epochs, "awaiting next arrival");
        scheduler.update(&mut inbox).await?;
        epoch += 1;
        if params.validation_flag || epoch == params.num_epochs {
            ctx.compute(VALIDATION_COST_FACTOR * speed).await;
            if epoch == params.num_epochs {
                break;
            }
        }
    }

    info!(
        pending = scheduler.pending_len(),
        "all rounds complete, stopping clients"
    );
    scheduler.drain(&mut inbox).await?;
    scheduler.terminate_clients().await?;

    let mut report = scheduler.into_report();
    report.global_step = epoch;
    report.virtual_duration = ctx.now();
    Ok(report)
}
