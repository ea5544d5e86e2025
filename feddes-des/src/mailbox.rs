//! Named, typed, FIFO mailboxes.
//!
//! Mailboxes are created on demand by name. Any number of senders may attach
//! to a name, but the receiving end can be claimed exactly once. A name is
//! bound to the payload type of its first use; attaching with a different
//! type is a fatal wiring error.
//!
//! [`Outbox::put`] charges the sending actor the virtual-time cost of moving
//! the given byte count over the link between the two endpoints, then
//! delivers the payload in FIFO order.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use feddes_common::{Error, Result};

use crate::platform::LinkCost;
use crate::sim::hold;

struct Slot {
    type_name: &'static str,
    endpoints: Box<dyn Any + Send>,
}

struct Endpoints<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Option<mpsc::UnboundedReceiver<T>>,
}

/// Registry of named mailboxes, shared by every actor of a simulation.
#[derive(Clone, Default)]
pub struct MailboxRegistry {
    inner: Arc<Mutex<HashMap<String, Slot>>>,
}

impl MailboxRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<T, R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Endpoints<T>) -> Result<R>,
    ) -> Result<R>
    where
        T: Send + 'static,
    {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = map.entry(name.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel::<T>();
            Slot {
                type_name: std::any::type_name::<T>(),
                endpoints: Box::new(Endpoints { tx, rx: Some(rx) }),
            }
        });
        let endpoints = slot
            .endpoints
            .downcast_mut::<Endpoints<T>>()
            .ok_or_else(|| {
                Error::Mailbox(format!(
                    "mailbox {name} carries {} but was accessed as {}",
                    slot.type_name,
                    std::any::type_name::<T>()
                ))
            })?;
        f(endpoints)
    }

    /// Returns a raw sender for the named mailbox, creating it on demand.
    pub fn sender<T>(&self, name: &str) -> Result<mpsc::UnboundedSender<T>>
    where
        T: Send + 'static,
    {
        self.with_slot::<T, _>(name, |endpoints| Ok(endpoints.tx.clone()))
    }

    /// Claims the receiving end of the named mailbox. Each mailbox has a
    /// single receiver; claiming twice is an error.
    pub fn receiver<T>(&self, name: &str) -> Result<mpsc::UnboundedReceiver<T>>
    where
        T: Send + 'static,
    {
        self.with_slot::<T, _>(name, |endpoints| {
            endpoints.rx.take().ok_or_else(|| {
                Error::Mailbox(format!("receiver of mailbox {name} already claimed"))
            })
        })
    }
}

/// Sending endpoint of a mailbox, bound to the link between two hosts.
pub struct Outbox<T> {
    name: String,
    tx: mpsc::UnboundedSender<T>,
    cost: LinkCost,
}

impl<T> Clone for Outbox<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            cost: self.cost,
        }
    }
}

impl<T> Outbox<T> {
    pub(crate) fn new(name: String, tx: mpsc::UnboundedSender<T>, cost: LinkCost) -> Self {
        Self { name, tx, cost }
    }

    /// Mailbox name this outbox feeds.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transmits `payload`, charging the sender the transfer time of `bytes`
    /// over the link before delivery.
    pub async fn put(&self, payload: T, bytes: f64) -> Result<()> {
        tracing::trace!(mailbox = %self.name, bytes, "transferring");
        hold(self.cost.transfer_time(bytes)).await;
        self.tx.send(payload).map_err(|_| {
            Error::Mailbox(format!("mailbox {} is closed", self.name))
        })
    }
}

/// Receiving endpoint of a mailbox.
pub struct Inbox<T> {
    name: String,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Inbox<T> {
    pub(crate) fn new(name: String, rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { name, rx }
    }

    /// Mailbox name this inbox drains.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocking receive; messages arrive in FIFO order. A closed mailbox is
    /// an error for callers that expect more traffic.
    pub async fn get(&mut self) -> Result<T> {
        self.rx.recv().await.ok_or_else(|| {
            Error::Mailbox(format!("mailbox {} closed while waiting", self.name))
        })
    }

    /// Blocking receive that surfaces closure as `None`.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn delivers_in_fifo_order() {
        let registry = MailboxRegistry::new();
        let tx = registry.sender::<u32>("box").unwrap();
        let mut inbox = Inbox::new("box".into(), registry.receiver::<u32>("box").unwrap());
        let outbox = Outbox::new("box".into(), tx, LinkCost::LOOPBACK);

        outbox.put(1, 0.0).await.unwrap();
        outbox.put(2, 0.0).await.unwrap();
        outbox.put(3, 0.0).await.unwrap();

        assert_eq!(inbox.get().await.unwrap(), 1);
        assert_eq!(inbox.get().await.unwrap(), 2);
        assert_eq!(inbox.get().await.unwrap(), 3);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn put_charges_transfer_time() {
        let registry = MailboxRegistry::new();
        let tx = registry.sender::<u32>("slow").unwrap();
        let cost = LinkCost {
            bandwidth: 100.0,
            latency: 1.0,
        };
        let outbox = Outbox::new("slow".into(), tx, cost);

        let before = tokio::time::Instant::now();
        outbox.put(7, 200.0).await.unwrap();
        let elapsed = (tokio::time::Instant::now() - before).as_secs_f64();
        assert!((elapsed - 3.0).abs() < 1e-9, "elapsed {elapsed}");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn type_mismatch_is_fatal() {
        let registry = MailboxRegistry::new();
        registry.sender::<u32>("typed").unwrap();
        let err = registry.sender::<f64>("typed").unwrap_err();
        assert!(err.to_string().contains("typed"));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn receiver_claimed_once() {
        let registry = MailboxRegistry::new();
        registry.receiver::<u32>("once").unwrap();
        assert!(registry.receiver::<u32>("once").is_err());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn closed_mailbox_surfaces() {
        let registry = MailboxRegistry::new();
        let tx = registry.sender::<u32>("gone").unwrap();
        let rx = registry.receiver::<u32>("gone").unwrap();
        let outbox = Outbox::new("gone".into(), tx, LinkCost::LOOPBACK);
        drop(rx);
        assert!(outbox.put(1, 0.0).await.is_err());
    }
}
