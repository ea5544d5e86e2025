//! Server-side aggregation bookkeeping for FedCompass.
//!
//! No model math happens here: the server tracks the global model version,
//! a per-group buffered-gradient marker and the count of ungrouped buffered
//! updates, charging the host the virtual-time cost of each operation.

use std::collections::BTreeMap;

use feddes_des::HostCtx;

/// Per-client fast-path aggregation cost, as a fraction of host speed.
const UPDATE_COST_FACTOR: f64 = 0.03;
/// Buffering cost, as a fraction of host speed.
const BUFFER_COST_FACTOR: f64 = 0.01;

/// Aggregation state of the FedCompass server.
#[derive(Debug, Default)]
pub struct ServerModel {
    global_step: u64,
    general_buffer_size: u64,
    group_pseudo_grad: BTreeMap<usize, u32>,
}

impl ServerModel {
    /// Fresh server state at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed global model version.
    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Count of ungrouped buffered updates since the last group commit.
    pub fn general_buffer_size(&self) -> u64 {
        self.general_buffer_size
    }

    /// Fast-path update from a single ungrouped client: advances the global
    /// model version.
    pub async fn update(&mut self, ctx: &HostCtx) {
        ctx.compute(UPDATE_COST_FACTOR * ctx.speed()).await;
        self.global_step += 1;
    }

    /// Buffers the local gradient of a client arriving for `group`.
    ///
    /// The table records "this group has buffered" rather than a running
    /// count: a group seen before restarts at zero before the increment.
    pub async fn buffer(&mut self, ctx: &HostCtx, group: usize) {
        if let Some(count) = self.group_pseudo_grad.get_mut(&group) {
            *count = 0;
        }
        ctx.compute(BUFFER_COST_FACTOR * ctx.speed()).await;
        *self.group_pseudo_grad.entry(group).or_insert(0) += 1;
    }

    /// Buffers a late, ungrouped local update.
    pub async fn single_buffer(&mut self, ctx: &HostCtx) {
        ctx.compute(BUFFER_COST_FACTOR * ctx.speed()).await;
        self.general_buffer_size += 1;
    }

    /// Commits `group` at aggregation time.
    ///
    /// Only a group with no buffered entry pays the update and advances the
    /// version here; groups that buffered were folded in on arrival.
    pub async fn update_group(&mut self, ctx: &HostCtx, group: usize) {
        if !self.group_pseudo_grad.contains_key(&group) {
            ctx.compute(BUFFER_COST_FACTOR * ctx.speed()).await;
            self.global_step += 1;
            self.general_buffer_size = 0;
        }
    }

    /// Closing bookkeeping once the epoch budget is exhausted: bumps the
    /// version at no cost.
    pub fn update_all(&mut self) {
        self.global_step += 1;
    }
}
