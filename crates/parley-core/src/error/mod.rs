use crate::worker::WorkerRole;

use error_location::ErrorLocation;
use thiserror::Error;

/// Session controller errors with source location tracking.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Transport connect or TLS handshake failed.
    #[error("Connect failed: {reason} {location}")]
    Connect {
        /// Description of the connect failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Server rejected the device or sent a malformed auth reply.
    #[error("Authentication failed: {reason} {location}")]
    Auth {
        /// Description of the auth failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Malformed control-channel message.
    #[error("Control message rejected: {source} {location}")]
    Parse {
        /// The parser's verdict.
        #[source]
        source: ParseError,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Capture or playback source/sink failure.
    #[error("{role} pipeline error: {reason} {location}")]
    Pipeline {
        /// Which pipeline failed.
        role: WorkerRole,
        /// Description of the pipeline failure.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Notification or request that makes no sense in the current state.
    #[error("Protocol violation: {reason} {location}")]
    ProtocolViolation {
        /// What was violated.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Stream used while closed.
    #[error("Stream is closed {location}")]
    StreamClosed {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Stream I/O did not complete within the configured timeout.
    #[error("Stream timed out after {timeout_ms}ms {location}")]
    StreamTimeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// `open` called on a stream that is already open.
    #[error("Stream is already open {location}")]
    AlreadyOpen {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// `start` called while an activation of the same worker is live.
    #[error("{role} worker is already running {location}")]
    WorkerBusy {
        /// Which worker was busy.
        role: WorkerRole,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// The event router's consumer has gone away.
    #[error("Event router closed {location}")]
    RouterClosed {
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// TLS material could not be loaded or configured.
    #[error("TLS configuration error: {reason} {location}")]
    Tls {
        /// Description of the TLS problem.
        reason: String,
        /// Source location where error occurred.
        location: ErrorLocation,
    },

    /// Underlying I/O failure.
    #[error("IO error: {source} {location}")]
    Io {
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
        /// Source location where error occurred.
        location: ErrorLocation,
    },
}

/// Reasons a control-channel payload is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Payload is not a JSON object.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// No string `header` field.
    #[error("missing header")]
    MissingHeader,

    /// `control` message without a `sub` object.
    #[error("missing sub")]
    MissingSub,

    /// `sub` lacks a string `part` or `action`.
    #[error("missing part/action")]
    MissingPartOrAction,

    /// `header` is neither `chat` nor `control`.
    #[error("unknown header '{0}'")]
    UnknownHeader(String),

    /// `sub.part` is not a known control part.
    #[error("unknown part '{0}'")]
    UnknownPart(String),

    /// `sub.action` is not valid for the given part.
    #[error("unknown action '{action}' for part '{part}'")]
    UnknownAction {
        /// The (known) part.
        part: String,
        /// The rejected action.
        action: String,
    },
}

impl ParseError {
    /// Short reason string for logging.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

impl From<std::io::Error> for SessionError {
    #[track_caller]
    fn from(source: std::io::Error) -> Self {
        SessionError::Io {
            source,
            location: ErrorLocation::from(std::panic::Location::caller()),
        }
    }
}

impl From<ParseError> for SessionError {
    #[track_caller]
    fn from(source: ParseError) -> Self {
        SessionError::Parse {
            source,
            location: ErrorLocation::from(std::panic::Location::caller()),
        }
    }
}

/// Result type alias using [`SessionError`].
pub type Result<T> = std::result::Result<T, SessionError>;
