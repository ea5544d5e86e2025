//! Integration test framework for FedDES.
//!
//! Provides fixtures (platforms, configurations, a fresh paused-clock
//! runtime per simulation) and the end-to-end scenarios exercising both
//! drivers over the full actor stack.

#![allow(missing_docs)]

pub mod fixtures;

#[cfg(test)]
mod scenarios;

pub use fixtures::{
    compass_config, fedavg_config, init_test_logging, run_simulation, test_platform,
};
