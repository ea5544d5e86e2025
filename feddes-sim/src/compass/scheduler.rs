//! Group-of-arrival scheduling.
//!
//! The scheduler keeps an online seconds-per-step estimate for every client
//! and maintains the live arrival groups. Each client return either joins a
//! group whose expected arrival it can meet with an in-bounds step count, or
//! opens a new group whose deadline respects the groups still in flight.
//! A group aggregates when its last member arrives or when its
//! latest-arrival deadline fires, whichever comes first.

use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::mpsc;
use tracing::{debug, info};

use feddes_common::{Error, Result};
use feddes_des::{hold, HostCtx, Inbox, Outbox};

use crate::report::{ClientSummary, RunReport, StepAssignment};

use super::server::ServerModel;
use super::{
    CompassParams, ServerEvent, MODEL_HEADER_BYTES, RECV_COST_FACTOR, SEND_COST_FACTOR,
    STOP_COST_FACTOR,
};

/// Weight of the newest sample in the speed estimate; newer samples dominate.
pub(crate) const NEW_SAMPLE_WEIGHT: f64 = 0.9;

/// Factor on `max_local_steps` giving the largest step count a join may
/// prescribe.
const STEP_BOUND_FACTOR: f64 = 1.2;

/// Scheduler view of one client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientInfo {
    /// Last global model version this client observed.
    pub step: u64,
    /// Step count assigned for the active round; -1 until first assignment.
    pub local_steps: i64,
    /// Cumulative assigned steps.
    pub total_steps: i64,
    /// Arrival group this client is training toward, if any.
    pub group: Option<usize>,
    /// Smoothed seconds-per-step estimate.
    pub speed: f64,
    /// Virtual time at which the current local round began.
    pub start_time: f64,
}

/// One live group of arrival.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrivalGroup {
    /// Clients still training toward this group.
    pub clients: Vec<usize>,
    /// Clients that reported back before the deadline.
    pub arrived: Vec<usize>,
    /// Planned aggregation instant.
    pub expected_arrival: f64,
    /// Hard deadline; the group aggregates here regardless.
    pub latest_arrival: f64,
}

/// Folds a new speed sample into the running estimate.
pub(crate) fn smoothed(previous: f64, sample: f64) -> f64 {
    (1.0 - NEW_SAMPLE_WEIGHT) * previous + NEW_SAMPLE_WEIGHT * sample
}

/// Picks the group a client of the given speed should join at `now`, with
/// the step count it would be assigned.
///
/// A group is eligible when the steps fitting into its remaining window lie
/// within the scheduler bounds; among eligible groups the largest step count
/// wins, later group ids taking ties.
pub(crate) fn choose_join(
    groups: &BTreeMap<usize, ArrivalGroup>,
    speed: f64,
    now: f64,
    min_steps: i64,
    max_bound: i64,
) -> Option<(usize, i64)> {
    let mut best: Option<(usize, i64)> = None;
    for (&gid, group) in groups {
        let remaining = group.expected_arrival - now;
        let steps = (remaining / speed) as i64;
        if steps < min_steps || steps > max_bound {
            continue;
        }
        if let Some((_, best_steps)) = best {
            if steps < best_steps {
                continue;
            }
        }
        best = Some((gid, steps));
    }
    best
}

/// Step budget for a group created at `now`, chosen so the new group's
/// deadline does not starve clients expected back from still-open groups.
pub(crate) fn creation_budget(
    groups: &BTreeMap<usize, ArrivalGroup>,
    clients: &[Option<ClientInfo>],
    speed: f64,
    now: f64,
    max_steps: i64,
    min_steps: i64,
) -> i64 {
    let mut assigned: i64 = -1;
    for group in groups.values() {
        if now < group.latest_arrival {
            let mut fastest = f64::INFINITY;
            for &member in group.clients.iter().chain(group.arrived.iter()) {
                if let Some(info) = clients.get(member).and_then(|c| c.as_ref()) {
                    fastest = fastest.min(info.speed);
                }
            }
            // Earliest plausible re-arrival of that group's clients.
            let est_arrival = group.latest_arrival + fastest * max_steps as f64;
            // The window is truncated to whole seconds before the division.
            let steps = (((est_arrival - now) as i64) as f64 / speed) as i64;
            if steps <= max_steps {
                assigned = assigned.max(steps);
            }
        }
    }
    if assigned >= 0 && assigned < min_steps {
        min_steps
    } else if assigned < 0 {
        max_steps
    } else {
        assigned
    }
}

/// The FedCompass scheduler, owned by the server actor.
pub struct Scheduler {
    ctx: HostCtx,
    iter: u64,
    num_epochs: u64,
    group_counter: usize,
    max_local_steps: i64,
    min_local_steps: i64,
    max_steps_bound: i64,
    latest_time_factor: f64,
    start_time: f64,
    model_size: f64,
    clients: Vec<Option<ClientInfo>>,
    groups: BTreeMap<usize, ArrivalGroup>,
    pending: BTreeSet<usize>,
    server: ServerModel,
    to_clients: Vec<Outbox<i64>>,
    notify: mpsc::UnboundedSender<ServerEvent>,
    report: RunReport,
}

impl Scheduler {
    /// Builds the scheduler on the server's host.
    ///
    /// Preconditions (`CompassConfig::validate`): `max_local_steps >= 1`,
    /// `0 < q_ratio <= 1`, `lambda >= 1`.
    pub fn new(
        ctx: HostCtx,
        params: &CompassParams,
        to_clients: Vec<Outbox<i64>>,
        notify: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        let max_local_steps = params.max_local_steps;
        let min_local_steps = ((params.q_ratio * max_local_steps as f64) as i64).max(1);
        let max_steps_bound = (STEP_BOUND_FACTOR * max_local_steps as f64) as i64;
        let start_time = ctx.now();
        Self {
            ctx,
            iter: 0,
            num_epochs: params.num_epochs,
            group_counter: 0,
            max_local_steps,
            min_local_steps,
            max_steps_bound,
            latest_time_factor: params.lambda,
            start_time,
            model_size: params.model_size,
            clients: vec![None; params.num_clients],
            groups: BTreeMap::new(),
            pending: BTreeSet::new(),
            server: ServerModel::new(),
            to_clients,
            notify,
            report: RunReport::default(),
        }
    }

    /// Virtual time since the scheduler was created.
    fn now(&self) -> f64 {
        self.ctx.now() - self.start_time
    }

    /// Number of clients with a model in flight.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Client returns processed so far.
    pub fn iterations(&self) -> u64 {
        self.iter
    }

    fn info(&self, client: usize) -> Result<&ClientInfo> {
        self.clients
            .get(client)
            .and_then(|c| c.as_ref())
            .ok_or_else(|| Error::Simulation(format!("no info recorded for client {client}")))
    }

    fn info_mut(&mut self, client: usize) -> Result<&mut ClientInfo> {
        self.clients
            .get_mut(client)
            .and_then(|c| c.as_mut())
            .ok_or_else(|| Error::Simulation(format!("no info recorded for client {client}")))
    }

    /// Sends the initial model (with the full step budget) to every client.
    pub async fn broadcast_initial(&mut self) -> Result<()> {
        for client in 0..self.to_clients.len() {
            self.to_clients[client]
                .put(self.model_size as i64, MODEL_HEADER_BYTES)
                .await?;
            self.to_clients[client]
                .put(self.max_local_steps, self.model_size)
                .await?;
            self.ctx.compute(SEND_COST_FACTOR * self.ctx.speed()).await;
            self.pending.insert(client);
            self.report.bootstrap_sent += 1;
            self.report.models_sent += 1;
            self.report.step_assignments.push(StepAssignment {
                client,
                steps: self.max_local_steps,
            });
            info!(client, steps = self.max_local_steps, "broadcast initial model");
        }
        // Speed samples are measured from the end of the bootstrap broadcast.
        self.start_time = self.ctx.now();
        Ok(())
    }

    /// Processes server events until one client return has been handled.
    ///
    /// Deadline expiries arriving in between trigger their group aggregation
    /// and keep the wait going.
    pub async fn update(&mut self, inbox: &mut Inbox<ServerEvent>) -> Result<()> {
        loop {
            match inbox.get().await? {
                ServerEvent::GroupDeadline { group } => {
                    debug!(group, time = self.now(), "group deadline fired");
                    self.group_aggregation(group).await?;
                }
                ServerEvent::LocalUpdate { client } => {
                    self.ctx.compute(RECV_COST_FACTOR * self.ctx.speed()).await;
                    self.pending.remove(&client);
                    self.report.replies_received += 1;
                    info!(
                        client,
                        pending = self.pending.len(),
                        time = self.now(),
                        "received local model"
                    );
                    self.record_info(client);
                    self.process_update(client).await?;
                    return Ok(());
                }
            }
        }
    }

    /// Folds the observed round time of `client` into its speed estimate,
    /// creating the client record on first contact.
    fn record_info(&mut self, client: usize) {
        let now = self.now();
        let (start, steps) = match &self.clients[client] {
            None => (0.0, self.max_local_steps),
            Some(info) => (info.start_time, info.local_steps),
        };
        let sample = (now - start) / steps as f64;
        match &mut self.clients[client] {
            None => {
                self.clients[client] = Some(ClientInfo {
                    step: 0,
                    local_steps: -1,
                    total_steps: self.min_local_steps,
                    group: None,
                    speed: sample,
                    start_time: 0.0,
                });
                debug!(client, speed = sample, "first speed sample");
            }
            Some(info) => {
                info.speed = smoothed(info.speed, sample);
                debug!(client, speed = info.speed, sample, "updated speed estimate");
            }
        }
    }

    /// Routes one processed return: ungrouped clients take the fast single
    /// path, grouped clients join their group's arrival bookkeeping.
    async fn process_update(&mut self, client: usize) -> Result<()> {
        self.iter += 1;
        match self.info(client)?.group {
            None => self.single_update(client, false).await,
            Some(group) => self.group_update(client, group).await,
        }
    }

    /// Aggregates a single ungrouped update (or buffers it when `buffer` is
    /// set), reassigns the client and hands it a fresh model while epochs
    /// remain.
    async fn single_update(&mut self, client: usize, buffer: bool) -> Result<()> {
        if buffer {
            self.server.single_buffer(&self.ctx).await;
            self.report.buffered_updates += 1;
        } else {
            self.server.update(&self.ctx).await;
        }
        let global_step = self.server.global_step();
        self.info_mut(client)?.step = global_step;
        self.assign_group(client)?;
        if self.iter < self.num_epochs {
            self.send_model(client).await?;
        } else {
            self.server.update_all();
        }
        Ok(())
    }

    /// Handles the return of a grouped client: late arrivals fall back to the
    /// buffered single path, timely ones move into the arrived set and may
    /// complete the group.
    async fn group_update(&mut self, client: usize, group_id: usize) -> Result<()> {
        let now = self.now();
        let group = self.groups.get_mut(&group_id).ok_or_else(|| {
            Error::Simulation(format!("client {client} references dead group {group_id}"))
        })?;

        if now >= group.latest_arrival {
            group.clients.retain(|&c| c != client);
            if group.clients.is_empty() {
                self.groups.remove(&group_id);
                info!(client, group = group_id, time = now, "late arrival dissolved group");
            } else {
                info!(client, group = group_id, time = now, "client arrived late");
            }
            self.single_update(client, true).await
        } else {
            group.clients.retain(|&c| c != client);
            group.arrived.push(client);
            let complete = group.clients.is_empty();
            info!(client, group = group_id, time = now, "client arrived at group");
            self.server.buffer(&self.ctx, group_id).await;
            if complete {
                self.group_aggregation(group_id).await?;
            }
            Ok(())
        }
    }

    /// Aggregates a group: commits it server-side, reassigns every arrived
    /// client (slowest first) and sends them fresh models while epochs
    /// remain. A group already dissolved by its last arrival is skipped.
    async fn group_aggregation(&mut self, group_id: usize) -> Result<()> {
        if !self.groups.contains_key(&group_id) {
            return Ok(());
        }
        self.server.update_group(&self.ctx, group_id).await;

        let global_step = self.server.global_step();
        let mut arrived: Vec<(usize, f64)> = Vec::new();
        if let Some(group) = self.groups.get(&group_id) {
            for &client in &group.arrived {
                arrived.push((client, self.info(client)?.speed));
            }
        }
        for &(client, _) in &arrived {
            self.info_mut(client)?.step = global_step;
        }
        arrived.sort_by(|a, b| a.1.total_cmp(&b.1));

        if let Some(group) = self.groups.get_mut(&group_id) {
            group.expected_arrival = 0.0;
            group.latest_arrival = 0.0;
        }
        for &(client, _) in &arrived {
            self.assign_group(client)?;
        }
        if self
            .groups
            .get(&group_id)
            .is_some_and(|g| g.clients.is_empty())
        {
            self.groups.remove(&group_id);
            info!(group = group_id, time = self.now(), "group deleted");
        }
        if self.iter < self.num_epochs {
            for &(client, _) in &arrived {
                self.send_model(client).await?;
            }
        } else {
            self.server.update_all();
        }
        Ok(())
    }

    /// Places a client into a group: the first client seeds a fresh group,
    /// later ones join an eligible group or open a new one.
    fn assign_group(&mut self, client: usize) -> Result<()> {
        let now = self.now();
        if self.groups.is_empty() {
            self.seed_first_group(client, now)
        } else if !self.join_group(client, now)? {
            self.create_group(client, now)
        } else {
            Ok(())
        }
    }

    /// Seeds the first group around a lone client with the full step budget.
    ///
    /// The deadline horizon here is a single step (`speed * lambda`), unlike
    /// later groups whose horizon scales with the assigned steps.
    fn seed_first_group(&mut self, client: usize, now: f64) -> Result<()> {
        let speed = self.info(client)?.speed;
        let group_id = self.next_group_id();
        let expected = now + self.max_local_steps as f64 * speed;
        let latest = now + speed * self.latest_time_factor;
        self.groups.insert(
            group_id,
            ArrivalGroup {
                clients: vec![client],
                arrived: Vec::new(),
                expected_arrival: expected,
                latest_arrival: latest,
            },
        );
        self.schedule_deadline(group_id, latest - now);
        let steps = self.max_local_steps;
        let info = self.info_mut(client)?;
        info.group = Some(group_id);
        info.local_steps = steps;
        info.start_time = now;
        info!(client, group = group_id, steps, time = now, "created group");
        Ok(())
    }

    /// Tries to place the client into an existing group; returns whether a
    /// group accepted it.
    fn join_group(&mut self, client: usize, now: f64) -> Result<bool> {
        let speed = self.info(client)?.speed;
        let Some((group_id, steps)) = choose_join(
            &self.groups,
            speed,
            now,
            self.min_local_steps,
            self.max_steps_bound,
        ) else {
            return Ok(false);
        };
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.clients.push(client);
        }
        let info = self.info_mut(client)?;
        info.group = Some(group_id);
        info.local_steps = steps;
        info.start_time = now;
        info!(client, group = group_id, steps, time = now, "joined group");
        Ok(true)
    }

    /// Opens a new group for the client with a step budget that respects the
    /// deadlines of the groups still in flight.
    fn create_group(&mut self, client: usize, now: f64) -> Result<()> {
        let speed = self.info(client)?.speed;
        let steps = creation_budget(
            &self.groups,
            &self.clients,
            speed,
            now,
            self.max_local_steps,
            self.min_local_steps,
        );
        let group_id = self.next_group_id();
        let expected = now + steps as f64 * speed;
        let latest = now + steps as f64 * speed * self.latest_time_factor;
        self.groups.insert(
            group_id,
            ArrivalGroup {
                clients: vec![client],
                arrived: Vec::new(),
                expected_arrival: expected,
                latest_arrival: latest,
            },
        );
        self.schedule_deadline(group_id, latest - now);
        let info = self.info_mut(client)?;
        info.group = Some(group_id);
        info.local_steps = steps;
        info.start_time = now;
        info!(client, group = group_id, steps, time = now, "created group");
        Ok(())
    }

    fn next_group_id(&mut self) -> usize {
        let id = self.group_counter;
        self.group_counter += 1;
        id
    }

    /// Arms the latest-arrival timer for a group. The group id travels by
    /// value; the aggregation handler re-checks that the group still exists
    /// when the timer fires.
    fn schedule_deadline(&self, group: usize, delay: f64) {
        debug!(group, delay, "armed group deadline");
        let notify = self.notify.clone();
        tokio::spawn(async move {
            hold(delay).await;
            let _ = notify.send(ServerEvent::GroupDeadline { group });
        });
    }

    /// Dispatches a fresh model carrying the client's assigned step count.
    async fn send_model(&mut self, client: usize) -> Result<()> {
        let steps = {
            let info = self.info_mut(client)?;
            info.total_steps += info.local_steps;
            debug!(client, total_steps = info.total_steps, "cumulative steps");
            info.local_steps
        };
        info!(client, steps, "sending global model");
        self.to_clients[client].put(steps, self.model_size).await?;
        self.ctx.compute(SEND_COST_FACTOR * self.ctx.speed()).await;
        self.pending.insert(client);
        self.report.models_sent += 1;
        self.report
            .step_assignments
            .push(StepAssignment { client, steps });
        Ok(())
    }

    /// Consumes the replies of clients that still have a model in flight.
    /// Stale deadline events are discarded for free.
    pub async fn drain(&mut self, inbox: &mut Inbox<ServerEvent>) -> Result<()> {
        while !self.pending.is_empty() {
            match inbox.get().await? {
                ServerEvent::LocalUpdate { client } => {
                    self.ctx.compute(RECV_COST_FACTOR * self.ctx.speed()).await;
                    self.pending.remove(&client);
                    self.report.replies_received += 1;
                    debug!(client, pending = self.pending.len(), "drained late response");
                }
                ServerEvent::GroupDeadline { .. } => {}
            }
        }
        Ok(())
    }

    /// Sends the stop sentinel to every client.
    pub async fn terminate_clients(&mut self) -> Result<()> {
        for client in 0..self.to_clients.len() {
            self.to_clients[client].put(-1, 0.0).await?;
            self.ctx.compute(STOP_COST_FACTOR * self.ctx.speed()).await;
            self.report.sentinels_sent += 1;
            debug!(client, "sent stop signal");
        }
        Ok(())
    }

    /// Finalizes the run report.
    pub fn into_report(self) -> RunReport {
        let mut report = self.report;
        report.model_version = self.server.global_step();
        report.pending_clients = self.pending.len() as u64;
        for (client, info) in self.clients.iter().enumerate() {
            if let Some(info) = info {
                report.clients.push(ClientSummary {
                    client,
                    speed: info.speed,
                    total_steps: info.total_steps,
                    last_global_step: info.step,
                });
            }
        }
        report
    }
}
