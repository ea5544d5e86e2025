//! Discrete-event simulation substrate for FedDES.
//!
//! Actors are tokio tasks on a current-thread runtime whose clock is paused
//! (`start_paused`): when every task is idle the runtime advances the clock
//! straight to the next pending timer, which is exactly discrete-event
//! semantics. On top of that substrate this crate provides:
//!
//! - [`Platform`]: hosts with a compute speed and the links between them,
//!   loaded from a YAML description.
//! - [`Simulation`] / [`HostCtx`]: the virtual clock and the per-host compute
//!   and sleep primitives.
//! - [`Outbox`] / [`Inbox`]: named, typed, FIFO mailboxes whose `put` charges
//!   the sender the link cost of the transferred bytes.
//!
//! Every binary and test driving a simulation must run on a current-thread
//! runtime with `start_paused = true`; wall-clock time never passes.

pub mod mailbox;
pub mod platform;
pub mod sim;

pub use mailbox::{Inbox, MailboxRegistry, Outbox};
pub use platform::{HostSpec, LinkCost, Platform};
pub use sim::{hold, HostCtx, Simulation};
