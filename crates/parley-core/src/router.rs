//! Event router: the single ordered channel into the session state machine.
//!
//! Every asynchronous source (buttons, workers, control channel, Wi-Fi,
//! signals) holds a [`RouterSender`]; the state machine owns the only
//! [`RouterReceiver`]. The channel is bounded, so a flood of notifications
//! applies backpressure to producers instead of dropping anything.

use crate::{CoreResult, Notification, SessionError};

use std::panic::Location;

use error_location::ErrorLocation;
use tokio::sync::mpsc;
use tracing::trace;

/// Default router capacity.
pub const DEFAULT_ROUTER_CAPACITY: usize = 10;

/// Creates a router with the given capacity.
pub fn channel(capacity: usize) -> (RouterSender, RouterReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (RouterSender { tx }, RouterReceiver { rx })
}

/// Producer side of the router. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RouterSender {
    tx: mpsc::Sender<Notification>,
}

impl RouterSender {
    /// Posts a notification, waiting for a free slot when the router is full.
    ///
    /// # Errors
    ///
    /// Returns `RouterClosed` once the state machine has gone away.
    pub async fn post(&self, notification: Notification) -> CoreResult<()> {
        trace!(source = notification.source(), "Posting notification");
        self.tx
            .send(notification)
            .await
            .map_err(|_| SessionError::RouterClosed {
                location: ErrorLocation::from(Location::caller()),
            })
    }

    /// Blocking variant of [`post`](Self::post) for producers running on
    /// plain threads. Must not be called from inside the async runtime.
    #[track_caller]
    pub fn blocking_post(&self, notification: Notification) -> CoreResult<()> {
        let location = Location::caller();
        self.tx
            .blocking_send(notification)
            .map_err(|_| SessionError::RouterClosed {
                location: ErrorLocation::from(location),
            })
    }

    /// Whether the consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the router, owned by the session state machine.
#[derive(Debug)]
pub struct RouterReceiver {
    rx: mpsc::Receiver<Notification>,
}

impl RouterReceiver {
    /// Waits for the next notification. `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Takes a notification if one is already queued.
    pub fn try_next(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }
}
