//! Common test fixtures and runtime helpers.

use std::future::Future;
use std::sync::Once;

use feddes_common::config::{CommonConfig, CompassConfig, Control};
use feddes_des::Platform;

/// Initializes test logging once; later calls are no-ops.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Uniform full-mesh platform of `num_nodes` hosts.
pub fn test_platform(num_nodes: u32) -> Platform {
    Platform::full_mesh(num_nodes, 1e9, 1.25e8, 1e-3)
}

/// FedAvg configuration with unit costs and no stragglers.
pub fn fedavg_config(num_nodes: u32, clients_per_node: u32, epochs: u64) -> CommonConfig {
    CommonConfig {
        num_nodes,
        clients_per_node,
        epochs,
        dataloader_cost: 1.0,
        aggregation_cost: 1.0,
        training_cost: 1.0,
        comm_cost: 1.0,
        control: Control::Deterministic,
        run_seed: 0,
        stragglers: Vec::new(),
    }
}

/// FedCompass configuration with unit costs and no stragglers.
pub fn compass_config(
    num_nodes: u32,
    clients_per_node: u32,
    epochs: u64,
    max_local_steps: i64,
) -> CompassConfig {
    CompassConfig {
        common: fedavg_config(num_nodes, clients_per_node, epochs),
        max_local_steps,
        q_ratio: 0.2,
        lambda: 1.5,
        validation_cost: 0.0,
        validation_flag: 0,
        model_size: 64.0,
    }
}

/// Runs one simulation on a fresh current-thread runtime with the clock
/// paused from its epoch.
///
/// Each simulation gets its own runtime so timer bookkeeping starts
/// identically; two runs of the same seeded configuration produce the same
/// trace.
pub fn run_simulation<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("failed to build test runtime")
        .block_on(future)
}
