//! FedDES simulation actors and drivers.
//!
//! Two federated-learning algorithms run on the [`feddes_des`] substrate:
//!
//! - [`fedavg`]: the synchronous baseline. The server broadcasts a model to
//!   every client each round and waits for all replies before the next round.
//! - [`compass`]: the asynchronous group-of-arrival scheduler. Every client
//!   arrival updates an online speed estimate and either joins an existing
//!   arrival group or opens a new one; groups aggregate when complete or at
//!   their latest-arrival deadline.
//!
//! [`deploy`] places the server and client actors on platform hosts and runs
//! a complete simulation, returning a [`report::RunReport`] of what happened.

pub mod client;
pub mod compass;
pub mod deploy;
pub mod fedavg;
pub mod report;

pub use deploy::{run_compass, run_fedavg};
pub use report::RunReport;
