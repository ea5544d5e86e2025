//! Common infrastructure for the FedDES simulator.
//!
//! This crate carries the pieces every other crate needs: the library error
//! type, logging setup, the simulation configuration (shared FedAvg keys plus
//! the FedCompass extension keys), and the straggler rule parser that turns a
//! rule list into per-client cost multipliers.

pub mod config;
pub mod error;
pub mod logging;
pub mod straggler;

pub use config::{CommonConfig, CompassConfig, Control};
pub use error::{Error, Result};
pub use straggler::{client_effects, effect_for, StragglerRule};
