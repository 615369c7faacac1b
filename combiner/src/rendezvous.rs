//! Rendezvous - unbuffered synchronous hand-off
//!
//! A `put` does not complete until the receiver has taken the item. Each offer
//! carries a one-shot acceptance channel; the receiver acknowledges an offer
//! as it takes it. An offer whose sender gave up (its `put` future was dropped)
//! is discarded by the receiver and never observed by the consumer.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::CombinerError;

/// An item waiting for a consumer, plus the channel that releases the producer
struct Offer<T> {
    item: T,
    accepted: oneshot::Sender<()>,
}

/// Create a connected sender/receiver pair
pub fn channel<T>() -> (RendezvousSender<T>, RendezvousReceiver<T>) {
    debug!("rendezvous::channel: called");
    let (tx, rx) = mpsc::channel(1);
    (RendezvousSender { tx }, RendezvousReceiver { rx })
}

/// Producer side of a rendezvous
///
/// Cloneable; clones hand off into the same receiver.
pub struct RendezvousSender<T> {
    tx: mpsc::Sender<Offer<T>>,
}

impl<T> Clone for RendezvousSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> RendezvousSender<T> {
    /// Hand `item` to the consumer, suspending until it has been taken
    pub async fn put(&self, item: T) -> Result<(), CombinerError> {
        let (accepted, accepted_rx) = oneshot::channel();
        self.tx
            .send(Offer { item, accepted })
            .await
            .map_err(|_| CombinerError::OutputClosed)?;

        accepted_rx.await.map_err(|_| CombinerError::OutputClosed)
    }

    /// True once the receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a rendezvous
pub struct RendezvousReceiver<T> {
    rx: mpsc::Receiver<Offer<T>>,
}

impl<T> RendezvousReceiver<T> {
    /// Take the next item, suspending until a producer offers one
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let Offer { item, accepted } = self.rx.recv().await?;
            if accepted.send(()).is_ok() {
                return Some(item);
            }
            debug!("RendezvousReceiver::recv: discarding abandoned offer");
        }
    }
}
