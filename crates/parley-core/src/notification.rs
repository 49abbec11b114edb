use crate::{
    control::Command,
    worker::{ActivationId, WorkerEvent},
};

/// Physical buttons on the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonId {
    /// Button A: starts a conversation, ends recording, cancels playback.
    Home,
    /// Secondary button; reported but not bound to a transition.
    Aux,
}

/// Edge reported by the button monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEdge {
    /// Button went down.
    Pressed,
    /// Button came up after a short hold.
    Released,
    /// Button came up after a hold longer than the long-press threshold.
    LongReleased,
}

/// One button edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    /// Which button.
    pub button: ButtonId,
    /// Which edge.
    pub edge: ButtonEdge,
}

/// Network connectivity as reported by the Wi-Fi manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStatus {
    /// Station associated and addressed.
    Connected,
    /// Station lost its association.
    Disconnected,
}

/// Requests from outside the session (signals, supervisor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRequest {
    /// Abandon the current session and return to standby.
    Reset,
    /// Tear everything down and leave the decision loop.
    Shutdown,
}

/// Lifecycle report from one worker activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Activation that produced the report.
    pub activation: ActivationId,
    /// What happened.
    pub event: WorkerEvent,
}

/// Everything the session state machine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Button edge from the button monitor.
    Button(ButtonEvent),
    /// Capture worker lifecycle.
    Capture(WorkerReport),
    /// Playback worker lifecycle.
    Playback(WorkerReport),
    /// Parsed command from the control channel.
    ControlChannel(Command),
    /// Connectivity change.
    Wifi(WifiStatus),
    /// External reset/shutdown request.
    Request(SessionRequest),
}

impl Notification {
    /// Short source tag for logs.
    pub fn source(&self) -> &'static str {
        match self {
            Notification::Button(_) => "button",
            Notification::Capture(_) => "capture",
            Notification::Playback(_) => "playback",
            Notification::ControlChannel(_) => "control",
            Notification::Wifi(_) => "wifi",
            Notification::Request(_) => "request",
        }
    }
}
