//! Local Unix-socket bridge to the pub/sub relay.
//!
//! Every line a client writes is one inbound control payload. Publications
//! are broadcast to every connected client as `{"topic": ..., "payload": ...}`
//! lines.

use crate::{AppError, AppResult, ControlHandler, ControlPublisher};

use std::{
    panic::Location,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use error_location::ErrorLocation;
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream, unix::OwnedWriteHalf},
    sync::{Mutex, watch},
};
use tracing::{debug, info, instrument, warn};

/// Unix-socket control bridge.
pub struct ControlBridge {
    socket_path: PathBuf,
    clients: Mutex<Vec<Client>>,
    next_client: AtomicU64,
}

/// Write half of a connected client, keyed for removal by its reader task.
struct Client {
    id: u64,
    writer: OwnedWriteHalf,
}

impl ControlBridge {
    /// A bridge that will listen on `socket_path`.
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            clients: Mutex::new(Vec::new()),
            next_client: AtomicU64::new(0),
        }
    }

    /// Number of clients currently attached.
    #[cfg(test)]
    pub(crate) async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// The socket path this bridge listens on.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket, replacing a stale one.
    #[track_caller]
    pub fn bind(&self) -> AppResult<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                AppError::ControlBridgeError {
                    reason: format!("Failed to remove existing socket: {}", e),
                    location: ErrorLocation::from(Location::caller()),
                }
            })?;
        }

        UnixListener::bind(&self.socket_path).map_err(|e| AppError::ControlBridgeError {
            reason: format!("Failed to bind {}: {}", self.socket_path.display(), e),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Accepts clients until a shutdown signal is received, then removes the
    /// socket file.
    #[instrument(skip(self, listener, handler, shutdown_rx), fields(socket = ?self.socket_path))]
    pub async fn run(
        self: Arc<Self>,
        listener: UnixListener,
        handler: Arc<ControlHandler>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> AppResult<()> {
        info!("Control bridge listening");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Control bridge shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted.map_err(|e| AppError::ControlBridgeError {
                        reason: format!("Failed to accept connection: {}", e),
                        location: ErrorLocation::from(Location::caller()),
                    })?;
                    self.attach(stream, Arc::clone(&handler)).await;
                }
            }
        }

        self.clients.lock().await.clear();
        if self.socket_path.exists()
            && let Err(e) = std::fs::remove_file(&self.socket_path)
        {
            warn!(error = %e, "Failed to remove socket file");
        }

        Ok(())
    }

    async fn attach(self: &Arc<Self>, stream: UnixStream, handler: Arc<ControlHandler>) {
        let (reader, writer) = stream.into_split();
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().await.push(Client { id, writer });
        debug!(client = id, "Control client connected");

        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if let Err(e) = handler.handle_payload(line).await {
                            warn!(error = %e, "Control client stopped: session gone");
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(client = id, "Control client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(client = id, error = %e, "Control client read failed");
                        break;
                    }
                }
            }
            bridge.detach(id).await;
        });
    }

    async fn detach(&self, id: u64) {
        self.clients.lock().await.retain(|client| client.id != id);
    }
}

#[async_trait]
impl ControlPublisher for ControlBridge {
    async fn publish(&self, topic: &str, payload: &str) -> AppResult<()> {
        let mut line = json!({ "topic": topic, "payload": payload }).to_string();
        line.push('\n');

        let mut clients = self.clients.lock().await;
        let mut delivered = Vec::with_capacity(clients.len());
        for mut client in clients.drain(..) {
            match client.writer.write_all(line.as_bytes()).await {
                Ok(()) => delivered.push(client),
                Err(e) => debug!(client = client.id, error = %e, "Dropping disconnected control client"),
            }
        }
        *clients = delivered;

        debug!(topic, subscribers = clients.len(), "Published");
        Ok(())
    }
}
