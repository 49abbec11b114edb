//! Authenticated byte stream to the voice server.
//!
//! Opening a stream connects the transport (TLS or plain TCP), then runs the
//! device handshake: an 18-byte identity record out, an 8-byte reply in,
//! and only `accept` grants a session. The session then carries the
//! three-byte markers `rec`, `end` and `brk` interleaved with audio.

mod connector;
mod handshake;
mod server_stream;

pub use connector::{Connector, TcpConnector, TlsConnector, TlsSettings};
pub use handshake::{
    ACCEPT_TOKEN, AUTH_REPLY_LEN, DeviceIdentity, IDENTITY_RECORD_LEN, Marker, authenticate,
};
pub use server_stream::{DEFAULT_TIMEOUT, ServerStream};

use crate::CoreResult;

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// A reusable, authenticated connection.
///
/// Reads and writes may run concurrently from different tasks. Every read
/// and write is bounded by the configured timeout.
#[async_trait]
pub trait SecureStream: Send + Sync {
    /// Connects and authenticates.
    ///
    /// # Errors
    ///
    /// `AlreadyOpen` if the stream is open, `Connect` if the transport cannot
    /// be established, `Auth` if the server does not accept the device.
    async fn open(&self, host: &str, port: u16) -> CoreResult<()>;

    /// Shuts the transport down. Returns `false` if it was already closed.
    async fn close(&self) -> bool;

    /// Reads up to `buf.len()` bytes. `Ok(0)` means the server hung up.
    ///
    /// # Errors
    ///
    /// `StreamTimeout` when nothing arrives in time (the stream stays
    /// usable), `StreamClosed` when not open, `Io` on transport failure.
    async fn read(&self, buf: &mut [u8]) -> CoreResult<usize>;

    /// Writes all of `buf` and flushes.
    ///
    /// # Errors
    ///
    /// `StreamTimeout`, `StreamClosed` or `Io`, as for [`read`](Self::read).
    async fn write(&self, buf: &[u8]) -> CoreResult<usize>;

    /// Replaces the per-operation timeout.
    fn set_timeout(&self, timeout: Duration);

    /// Current per-operation timeout.
    fn timeout(&self) -> Duration;

    /// Whether the stream is open and authenticated.
    fn is_open(&self) -> bool;
}

/// Writes a session marker.
///
/// # Errors
///
/// Propagates the underlying write failure.
pub async fn write_marker(stream: &dyn SecureStream, marker: Marker) -> CoreResult<()> {
    stream.write(marker.as_bytes()).await?;
    debug!(%marker, "Marker sent");
    Ok(())
}
