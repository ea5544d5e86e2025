//! Error types for the FedDES simulator.

use thiserror::Error;

/// Error type shared by the FedDES library crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration-related errors (missing keys, out-of-range values,
    /// invalid straggler rules).
    #[error("configuration error: {0}")]
    Config(String),

    /// Platform description errors (bad host/link definitions, no route).
    #[error("platform error: {0}")]
    Platform(String),

    /// Reference to a host the platform does not define.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// Mailbox wiring errors (payload type mismatch, receiver already
    /// claimed, channel closed).
    #[error("mailbox error: {0}")]
    Mailbox(String),

    /// Errors raised while the simulation is running.
    #[error("simulation error: {0}")]
    Simulation(String),

    /// File I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse errors (simulation config).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse errors (platform file).
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result alias used throughout the FedDES library crates.
pub type Result<T> = std::result::Result<T, Error>;
