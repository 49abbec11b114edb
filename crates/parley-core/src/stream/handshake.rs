use crate::{CoreResult, SessionError};

use std::{fmt, panic::Location, time::Duration};

use error_location::ErrorLocation;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument, warn};

/// Width of the identity record sent after connecting: 17 characters plus NUL.
pub const IDENTITY_RECORD_LEN: usize = 18;

/// Width of the server's auth reply.
pub const AUTH_REPLY_LEN: usize = 8;

/// The only reply that grants a session.
pub const ACCEPT_TOKEN: &[u8] = b"accept";

/// Hardware address the device authenticates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    mac: [u8; 6],
}

impl DeviceIdentity {
    /// Wraps a six-byte hardware address.
    pub fn new(mac: [u8; 6]) -> Self {
        Self { mac }
    }

    /// Parses `xx:xx:xx:xx:xx:xx` (case-insensitive hex).
    pub fn parse(text: &str) -> Option<Self> {
        let mut mac = [0u8; 6];
        let mut octets = text.trim().split(':');

        for slot in &mut mac {
            let octet = octets.next()?;
            if octet.len() != 2 {
                return None;
            }
            *slot = u8::from_str_radix(octet, 16).ok()?;
        }

        if octets.next().is_some() {
            return None;
        }

        Some(Self { mac })
    }

    /// The raw address bytes.
    pub fn octets(&self) -> [u8; 6] {
        self.mac
    }

    /// Fixed-width identity record, NUL padded.
    pub fn record(&self) -> [u8; IDENTITY_RECORD_LEN] {
        let mut record = [0u8; IDENTITY_RECORD_LEN];
        let text = self.to_string();
        record[..text.len()].copy_from_slice(text.as_bytes());
        record
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.mac;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Three-byte session markers exchanged on the authenticated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Client is about to upload audio.
    Rec,
    /// End of the current audio phase.
    End,
    /// Client aborted the upload.
    Brk,
}

impl Marker {
    /// Wire bytes.
    pub fn as_bytes(&self) -> &'static [u8; 3] {
        match self {
            Marker::Rec => b"rec",
            Marker::End => b"end",
            Marker::Brk => b"brk",
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Marker::Rec => "rec",
            Marker::End => "end",
            Marker::Brk => "brk",
        };
        f.write_str(name)
    }
}

/// Runs the application-level auth exchange on a freshly connected transport.
///
/// Sends the identity record and waits up to `timeout` for the 8-byte reply.
///
/// # Errors
///
/// Returns `Auth` if the record cannot be sent, no reply arrives in time, the
/// server hangs up, or the reply is anything other than `accept`.
#[instrument(skip(io, identity, timeout), fields(identity = %identity))]
pub async fn authenticate<T>(
    io: &mut T,
    identity: &DeviceIdentity,
    timeout: Duration,
) -> CoreResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let auth_error = |reason: String| SessionError::Auth {
        reason,
        location: ErrorLocation::from(Location::caller()),
    };

    let record = identity.record();
    match tokio::time::timeout(timeout, async {
        io.write_all(&record).await?;
        io.flush().await
    })
    .await
    {
        Ok(Ok(())) => debug!("Identity record sent"),
        Ok(Err(e)) => return Err(auth_error(format!("Failed to send identity: {}", e))),
        Err(_) => return Err(auth_error("Timed out sending identity".to_string())),
    }

    let mut reply = [0u8; AUTH_REPLY_LEN];
    match tokio::time::timeout(timeout, io.read_exact(&mut reply)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(auth_error(format!("No auth reply: {}", e))),
        Err(_) => {
            return Err(auth_error(format!(
                "No auth reply within {}ms",
                timeout.as_millis()
            )));
        }
    }

    if !reply.starts_with(ACCEPT_TOKEN) {
        let shown = String::from_utf8_lossy(&reply);
        let shown = shown.trim_end_matches('\0');
        warn!(reply = %shown, "Server refused device");
        return Err(auth_error(format!("Server replied '{}'", shown)));
    }

    debug!("Device accepted");
    Ok(())
}
