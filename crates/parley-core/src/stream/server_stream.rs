use crate::{
    CoreResult, SessionError,
    stream::{Connector, DeviceIdentity, SecureStream, handshake},
};

use std::{
    panic::Location,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use error_location::ErrorLocation;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::Mutex,
};
use tracing::{debug, info, instrument, warn};

/// Default I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// The authenticated connection to the voice server.
///
/// Created once and reused across open/close cycles. The read and write
/// halves are locked separately, so a marker written by the state machine
/// never queues behind a pending playback read.
pub struct ServerStream<C: Connector> {
    connector: C,
    identity: DeviceIdentity,
    reader: Mutex<Option<ReadHalf<C::Io>>>,
    writer: Mutex<Option<WriteHalf<C::Io>>>,
    is_open: AtomicBool,
    timeout_ms: AtomicU64,
}

impl<C: Connector> ServerStream<C> {
    /// Creates a closed stream.
    pub fn new(connector: C, identity: DeviceIdentity, timeout: Duration) -> Self {
        Self {
            connector,
            identity,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            is_open: AtomicBool::new(false),
            timeout_ms: AtomicU64::new(duration_ms(timeout)),
        }
    }

    /// Identity presented during authentication.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    #[track_caller]
    fn timeout_error(&self) -> SessionError {
        SessionError::StreamTimeout {
            timeout_ms: self.timeout_ms.load(Ordering::Acquire),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

#[async_trait]
impl<C: Connector> SecureStream for ServerStream<C> {
    #[instrument(skip(self))]
    async fn open(&self, host: &str, port: u16) -> CoreResult<()> {
        if self.is_open() {
            return Err(SessionError::AlreadyOpen {
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let timeout = self.timeout();

        let mut io = match tokio::time::timeout(timeout, self.connector.connect(host, port)).await
        {
            Ok(connected) => connected?,
            Err(_) => {
                return Err(SessionError::Connect {
                    reason: format!(
                        "Timed out connecting to {}:{} after {}ms",
                        host,
                        port,
                        timeout.as_millis()
                    ),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        };

        // On failure `io` is dropped here, which closes the transport.
        handshake::authenticate(&mut io, &self.identity, timeout).await?;

        let (reader, writer) = tokio::io::split(io);
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.is_open.store(true, Ordering::Release);

        info!(host, port, "Stream open and authenticated");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn close(&self) -> bool {
        if !self.is_open.swap(false, Ordering::AcqRel) {
            debug!("Close on a closed stream ignored");
            return false;
        }

        let writer = self.writer.lock().await.take();
        let reader = self.reader.lock().await.take();

        if let (Some(reader), Some(writer)) = (reader, writer) {
            let mut io = reader.unsplit(writer);
            match tokio::time::timeout(self.timeout(), io.shutdown()).await {
                Ok(Ok(())) => debug!("Transport shut down cleanly"),
                Ok(Err(e)) => warn!(error = %e, "Transport shutdown failed"),
                Err(_) => warn!("Transport shutdown timed out"),
            }
        }

        info!("Stream closed");

        true
    }

    async fn read(&self, buf: &mut [u8]) -> CoreResult<usize> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or_else(|| SessionError::StreamClosed {
            location: ErrorLocation::from(Location::caller()),
        })?;

        match tokio::time::timeout(self.timeout(), reader.read(buf)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(self.timeout_error()),
        }
    }

    async fn write(&self, buf: &[u8]) -> CoreResult<usize> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| SessionError::StreamClosed {
            location: ErrorLocation::from(Location::caller()),
        })?;

        let written = tokio::time::timeout(self.timeout(), async {
            writer.write_all(buf).await?;
            writer.flush().await
        })
        .await;

        match written {
            Ok(result) => {
                result?;
                Ok(buf.len())
            }
            Err(_) => Err(self.timeout_error()),
        }
    }

    fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(duration_ms(timeout), Ordering::Release);
        debug!(timeout_ms = duration_ms(timeout), "Stream timeout updated");
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Acquire))
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }
}

fn duration_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
}
