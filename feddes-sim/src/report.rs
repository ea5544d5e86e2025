//! Run summaries.
//!
//! Drivers return a [`RunReport`] describing the completed simulation: how
//! far the global model advanced, how many messages moved in each direction,
//! and the final per-client scheduler state. The reports feed the CLI summary
//! line and the scenario tests.

/// One local-step prescription dispatched to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepAssignment {
    /// Target client.
    pub client: usize,
    /// Assigned local step count.
    pub steps: i64,
}

/// Final scheduler view of one client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientSummary {
    /// Client id.
    pub client: usize,
    /// Smoothed seconds-per-step estimate at the end of the run.
    pub speed: f64,
    /// Cumulative local steps assigned over the run.
    pub total_steps: i64,
    /// Last global model version this client observed.
    pub last_global_step: u64,
}

/// Summary of a completed simulation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Virtual time at which the server finished.
    pub virtual_duration: f64,
    /// Global epochs the server completed.
    pub global_step: u64,
    /// Committed model version of the server bookkeeping; lags the epoch
    /// count because grouped arrivals fold into buffers rather than commits.
    pub model_version: u64,
    /// Bootstrap messages sent (model-size headers / comm-cost handshakes).
    pub bootstrap_sent: u64,
    /// Global models dispatched to clients, excluding the stop sentinel.
    pub models_sent: u64,
    /// Client replies the server consumed (in-loop and during the drain).
    pub replies_received: u64,
    /// Late arrivals routed to the general buffer instead of a group.
    pub buffered_updates: u64,
    /// Stop sentinels sent at termination.
    pub sentinels_sent: u64,
    /// Clients still awaited when the report was cut; zero after a clean
    /// termination drain.
    pub pending_clients: u64,
    /// Every step prescription dispatched, in send order.
    pub step_assignments: Vec<StepAssignment>,
    /// Final per-client scheduler state (FedCompass only).
    pub clients: Vec<ClientSummary>,
}

impl RunReport {
    /// One-line human summary for the CLI.
    pub fn summary(&self) -> String {
        format!(
            "global_step={} models_sent={} replies={} buffered={} duration={:.3}s",
            self.global_step,
            self.models_sent,
            self.replies_received,
            self.buffered_updates,
            self.virtual_duration
        )
    }
}
