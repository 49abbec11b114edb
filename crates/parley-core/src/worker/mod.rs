//! Capture and playback workers.
//!
//! Each `start()` spawns one activation: a fresh task that posts `Started`,
//! runs its pipeline, tears the pipeline down and then posts exactly one
//! terminal report. Cancellation is a `watch` signal separate from the
//! router, observed between pipeline iterations.

mod capture;
mod playback;

pub use capture::CaptureWorker;
pub use playback::{DEFAULT_IDLE_LIMIT, PlaybackWorker};

use crate::{
    CoreResult, Notification, SessionError, notification::WorkerReport, router::RouterSender,
};

use std::{
    fmt,
    panic::Location,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use error_location::ErrorLocation;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};
use uuid::Uuid;

/// Which pipeline a worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    /// Microphone to stream.
    Capture,
    /// Stream to speaker.
    Playback,
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Capture => f.write_str("capture"),
            WorkerRole::Playback => f.write_str("playback"),
        }
    }
}

/// Identifies one start-to-terminal run of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivationId(Uuid);

impl ActivationId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActivationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why an activation ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The data ran out on its own.
    Completed,
    /// `stop()` was called.
    Cancelled,
}

/// Lifecycle events posted by a worker activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// The activation is running. Always the first event.
    Started,
    /// Terminal: ended cleanly.
    Finished(FinishReason),
    /// Terminal: the pipeline or stream failed.
    Error(String),
}

impl WorkerEvent {
    /// Whether this is the last event of an activation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkerEvent::Started)
    }
}

/// Start/stop surface the state machine drives.
pub trait Worker: Send + Sync {
    /// Spawns a new activation and returns its id.
    ///
    /// # Errors
    ///
    /// `WorkerBusy` if the previous activation has not exited yet.
    fn start(&self) -> CoreResult<ActivationId>;

    /// Signals the live activation to stop. Returns `false`, and posts
    /// nothing, when no activation is running.
    fn stop(&self) -> bool;

    /// Whether an activation is between `Started` and its terminal report.
    fn is_running(&self) -> bool;
}

/// Spawn bookkeeping shared by both workers.
pub(crate) struct Activations {
    role: WorkerRole,
    router: RouterSender,
    running: Arc<AtomicBool>,
    live: std::sync::Mutex<Option<Live>>,
}

struct Live {
    id: ActivationId,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Handed to the spawned activation task.
pub(crate) struct ActivationContext {
    pub(crate) id: ActivationId,
    pub(crate) cancel: watch::Receiver<bool>,
    role: WorkerRole,
    router: RouterSender,
    running: Arc<AtomicBool>,
}

impl Activations {
    pub(crate) fn new(role: WorkerRole, router: RouterSender) -> Self {
        Self {
            role,
            router,
            running: Arc::new(AtomicBool::new(false)),
            live: std::sync::Mutex::new(None),
        }
    }

    /// Spawns `body` as a new activation unless one is still alive.
    #[track_caller]
    pub(crate) fn spawn<F, Fut>(&self, body: F) -> CoreResult<ActivationId>
    where
        F: FnOnce(ActivationContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());

        if live.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            return Err(SessionError::WorkerBusy {
                role: self.role,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let id = ActivationId::new();
        let (cancel, cancel_rx) = watch::channel(false);

        let context = ActivationContext {
            id,
            cancel: cancel_rx,
            role: self.role,
            router: self.router.clone(),
            running: Arc::clone(&self.running),
        };

        let handle = tokio::spawn(body(context));
        *live = Some(Live { id, cancel, handle });

        debug!(role = %self.role, activation = %id, "Activation spawned");

        Ok(id)
    }

    /// Cancels the live activation. An activation that has been spawned but
    /// not yet posted `Started` counts as live; it will still post `Started`
    /// before its terminal report.
    pub(crate) fn stop(&self) -> bool {
        let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        match live.as_ref() {
            Some(l) if !l.handle.is_finished() => {
                debug!(role = %self.role, activation = %l.id, "Cancelling activation");
                l.cancel.send_replace(true);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for Activations {
    fn drop(&mut self) {
        let live = self.live.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(l) = live.take() {
            l.cancel.send_replace(true);
        }
    }
}

impl ActivationContext {
    /// Marks the activation running and posts `Started`.
    pub(crate) async fn started(&self) -> CoreResult<()> {
        self.running.store(true, Ordering::Release);
        self.post(WorkerEvent::Started).await
    }

    /// Marks the activation stopped and posts its terminal report.
    pub(crate) async fn finish(self, event: WorkerEvent) {
        self.running.store(false, Ordering::Release);
        debug!(role = %self.role, activation = %self.id, event = ?event, "Activation finished");
        if let Err(e) = self.post(event).await {
            warn!(role = %self.role, error = %e, "Terminal report dropped");
        }
    }

    /// Whether cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation is requested. Pending forever if the
    /// owning worker has gone away without cancelling.
    pub(crate) async fn cancelled(&mut self) {
        if self.cancel.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub(crate) fn role(&self) -> WorkerRole {
        self.role
    }

    async fn post(&self, event: WorkerEvent) -> CoreResult<()> {
        let report = WorkerReport {
            activation: self.id,
            event,
        };
        let notification = match self.role {
            WorkerRole::Capture => Notification::Capture(report),
            WorkerRole::Playback => Notification::Playback(report),
        };
        self.router.post(notification).await
    }
}
