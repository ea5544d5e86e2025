//! Actor placement and full simulation runs.
//!
//! The server lives on `Node-1`. Client ids are laid out with
//! `clients_per_node - 1` clients next to the server (one slot is the
//! server's), the remainder filling `Node-2`, `Node-3`, ... in order.
//! Straggler multipliers scale each client's dataloader and training costs
//! at spawn time; clients sharing `Node-1` train at a discount.
//!
//! Mailbox names follow the wire contract: client i's inbox is `"i"`, the
//! server's inbox is `"N"` (the client count).

use tokio::task::JoinHandle;
use tracing::info;

use feddes_common::config::{CommonConfig, CompassConfig};
use feddes_common::straggler::effect_for;
use feddes_common::{Error, Result};
use feddes_des::Simulation;

use crate::client::{
    run_compass_client, run_fedavg_client, CompassClientParams, FedAvgClientParams,
};
use crate::compass::{run_compass_server, CompassParams, ServerEvent};
use crate::fedavg::{run_fedavg_server, FedAvgParams};
use crate::report::RunReport;

/// Host the server actor runs on.
pub const SERVER_HOST: &str = "Node-1";

/// Training-cost factor of clients colocated with the server.
pub const COLOCATED_TRAINING_FACTOR: f64 = 0.8;

/// Maps each client id to its host name.
pub fn client_host_names(num_nodes: u32, clients_per_node: u32) -> Vec<String> {
    let total = (num_nodes as usize) * (clients_per_node as usize) - 1;
    let mut hosts = Vec::with_capacity(total);
    for _ in 1..clients_per_node as usize {
        if hosts.len() == total {
            break;
        }
        hosts.push(SERVER_HOST.to_string());
    }
    let mut node = 2;
    while hosts.len() < total {
        for _ in 0..clients_per_node {
            if hosts.len() == total {
                break;
            }
            hosts.push(format!("Node-{node}"));
        }
        node += 1;
    }
    hosts
}

async fn join_actor(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .await
        .map_err(|e| Error::Simulation(format!("actor task failed: {e}")))?
}

/// Runs a complete FedAvg simulation on the given platform.
pub async fn run_fedavg(sim: &Simulation, cfg: &CommonConfig) -> Result<RunReport> {
    cfg.validate()?;
    let effects = cfg.client_effects()?;
    let hosts = client_host_names(cfg.num_nodes, cfg.clients_per_node);
    let num_clients = cfg.total_clients();
    let server_mailbox = num_clients.to_string();
    let server_ctx = sim.host(SERVER_HOST)?;

    let mut to_clients = Vec::with_capacity(num_clients);
    for (client, host) in hosts.iter().enumerate() {
        to_clients.push(server_ctx.outbox::<f64>(&client.to_string(), host)?);
    }
    let inbox = server_ctx.inbox::<usize>(&server_mailbox)?;

    let mut actors = Vec::with_capacity(num_clients);
    for (client, host) in hosts.iter().enumerate() {
        let ctx = sim.host(host)?;
        let multiplier = effect_for(&effects, client);
        let colocated = host.as_str() == SERVER_HOST;
        let params = FedAvgClientParams {
            client_id: client,
            rounds: cfg.epochs,
            dataloader_cost: cfg.dataloader_cost * multiplier,
            training_cost: cfg.training_cost
                * multiplier
                * if colocated { COLOCATED_TRAINING_FACTOR } else { 1.0 },
            control: cfg.control,
            run_seed: cfg.run_seed,
        };
        let client_inbox = ctx.inbox::<f64>(&client.to_string())?;
        let server_outbox = ctx.outbox::<usize>(&server_mailbox, SERVER_HOST)?;
        actors.push(tokio::spawn(run_fedavg_client(
            ctx,
            params,
            client_inbox,
            server_outbox,
        )));
    }

    let params = FedAvgParams {
        num_clients,
        num_epochs: cfg.epochs,
        dataloader_cost: cfg.dataloader_cost,
        comm_cost: cfg.comm_cost,
    };
    let report = run_fedavg_server(server_ctx, params, to_clients, inbox).await?;
    for actor in actors {
        join_actor(actor).await?;
    }
    info!(summary = %report.summary(), "fedavg run complete");
    Ok(report)
}

/// Runs a complete FedCompass simulation on the given platform.
pub async fn run_compass(sim: &Simulation, cfg: &CompassConfig) -> Result<RunReport> {
    cfg.validate()?;
    let effects = cfg.common.client_effects()?;
    let hosts = client_host_names(cfg.common.num_nodes, cfg.common.clients_per_node);
    let num_clients = cfg.common.total_clients();
    let server_mailbox = num_clients.to_string();
    let server_ctx = sim.host(SERVER_HOST)?;

    let mut to_clients = Vec::with_capacity(num_clients);
    for (client, host) in hosts.iter().enumerate() {
        to_clients.push(server_ctx.outbox::<i64>(&client.to_string(), host)?);
    }
    let inbox = server_ctx.inbox::<ServerEvent>(&server_mailbox)?;
    let notify = sim.sender::<ServerEvent>(&server_mailbox)?;

    let mut actors = Vec::with_capacity(num_clients);
    for (client, host) in hosts.iter().enumerate() {
        let ctx = sim.host(host)?;
        let multiplier = effect_for(&effects, client);
        let colocated = host.as_str() == SERVER_HOST;
        let params = CompassClientParams {
            client_id: client,
            dataloader_cost: cfg.common.dataloader_cost * multiplier,
            step_training_cost: cfg.common.training_cost
                * multiplier
                * if colocated { COLOCATED_TRAINING_FACTOR } else { 1.0 },
            control: cfg.common.control,
            run_seed: cfg.common.run_seed,
        };
        let client_inbox = ctx.inbox::<i64>(&client.to_string())?;
        let server_outbox = ctx.outbox::<ServerEvent>(&server_mailbox, SERVER_HOST)?;
        actors.push(tokio::spawn(run_compass_client(
            ctx,
            params,
            client_inbox,
            server_outbox,
        )));
    }

    let params = CompassParams::from_config(cfg);
    let report = run_compass_server(server_ctx, params, to_clients, inbox, notify).await?;
    for actor in actors {
        join_actor(actor).await?;
    }
    info!(summary = %report.summary(), "fedcompass run complete");
    Ok(report)
}
