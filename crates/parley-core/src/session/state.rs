use std::fmt;

/// Where the conversation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum SessionState {
    /// Tearing down after a failure; always followed by `Standby`.
    Reset = -1,
    /// Idle, waiting for the user.
    Standby = 0,
    /// Opening and authenticating the stream.
    Connecting,
    /// Uploading microphone audio.
    Recording,
    /// Upload stop requested, waiting for the capture worker to finish.
    StopRecording,
    /// Upload done, starting playback.
    RecordingFinished,
    /// Playing the server's reply.
    Playing,
    /// Reply done, stream closed.
    PlayingFinished,
    /// Terminal; the decision loop has exited.
    Shutdown,
}

impl SessionState {
    /// Every state, in declaration order.
    pub const ALL: [SessionState; 9] = [
        SessionState::Reset,
        SessionState::Standby,
        SessionState::Connecting,
        SessionState::Recording,
        SessionState::StopRecording,
        SessionState::RecordingFinished,
        SessionState::Playing,
        SessionState::PlayingFinished,
        SessionState::Shutdown,
    ];

    /// Numeric code, as reported to status displays.
    pub fn code(self) -> i8 {
        self as i8
    }

    /// Whether the capture worker may be uploading in this state.
    pub fn is_uploading(self) -> bool {
        matches!(self, SessionState::Recording | SessionState::StopRecording)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Reset => "reset",
            SessionState::Standby => "standby",
            SessionState::Connecting => "connecting",
            SessionState::Recording => "recording",
            SessionState::StopRecording => "stop-recording",
            SessionState::RecordingFinished => "recording-finished",
            SessionState::Playing => "playing",
            SessionState::PlayingFinished => "playing-finished",
            SessionState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}
