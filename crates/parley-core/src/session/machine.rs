use crate::{
    Notification, SessionError,
    control::{Command, ControlCommand},
    notification::{ButtonEdge, ButtonEvent, ButtonId, SessionRequest, WorkerReport},
    router::RouterReceiver,
    session::SessionState,
    stream::{Marker, SecureStream, write_marker},
    worker::{ActivationId, FinishReason, Worker, WorkerEvent, WorkerRole},
};

use std::{panic::Location, sync::Arc};

use error_location::ErrorLocation;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Observers that fall this far behind miss intermediate states.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// Accepted chat commands buffered for slow observers.
const CHAT_CHANNEL_CAPACITY: usize = 16;

/// A `chat` command the machine applied during `Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatAccepted {
    /// Whether the session reconnects once the reply has played.
    pub continue_chat: bool,
}

/// Where the machine connects to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

/// Owns the session state and drives the stream and both workers in
/// response to router notifications, one at a time.
pub struct SessionMachine {
    state: SessionState,
    router: RouterReceiver,
    stream: Arc<dyn SecureStream>,
    capture: Arc<dyn Worker>,
    playback: Arc<dyn Worker>,
    settings: SessionSettings,
    observers: broadcast::Sender<SessionState>,
    chats: broadcast::Sender<ChatAccepted>,
    continue_chat: bool,
    /// Capture activation whose terminal report has not arrived yet.
    capture_pending: Option<ActivationId>,
    /// Playback activation whose terminal report has not arrived yet.
    playback_pending: Option<ActivationId>,
    home_armed: bool,
    end_marker_due: bool,
    playback_cancelled: bool,
}

impl SessionMachine {
    /// A machine in `Standby`.
    pub fn new(
        router: RouterReceiver,
        stream: Arc<dyn SecureStream>,
        capture: Arc<dyn Worker>,
        playback: Arc<dyn Worker>,
        settings: SessionSettings,
    ) -> Self {
        let (observers, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (chats, _) = broadcast::channel(CHAT_CHANNEL_CAPACITY);

        Self {
            state: SessionState::Standby,
            router,
            stream,
            capture,
            playback,
            settings,
            observers,
            chats,
            continue_chat: false,
            capture_pending: None,
            playback_pending: None,
            home_armed: false,
            end_marker_due: false,
            playback_cancelled: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The continuation flag set by the last `chat` command.
    pub fn continue_chat(&self) -> bool {
        self.continue_chat
    }

    /// Receives every state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.observers.subscribe()
    }

    /// Receives every `chat` command the machine accepts from now on.
    /// Commands rejected outside `Playing` are not reported.
    pub fn subscribe_chats(&self) -> broadcast::Receiver<ChatAccepted> {
        self.chats.subscribe()
    }

    /// Runs the decision loop until shutdown. Returns the final state.
    pub async fn run(mut self) -> SessionState {
        info!(state = %self.state, "Session loop started");
        while self.step().await {}
        info!(state = %self.state, "Session loop exited");
        self.state
    }

    /// Waits for one notification and handles it. Returns `false` once the
    /// loop should exit.
    pub async fn step(&mut self) -> bool {
        match self.router.next().await {
            Some(notification) => {
                self.handle(notification).await;
                self.state != SessionState::Shutdown
            }
            None => {
                warn!("All notification producers are gone");
                self.shutdown().await;
                false
            }
        }
    }

    /// Applies one notification to the current state.
    #[instrument(skip(self, notification), fields(state = %self.state, source = notification.source()))]
    pub async fn handle(&mut self, notification: Notification) {
        if self.state == SessionState::Shutdown {
            debug!("Notification after shutdown ignored");
            return;
        }

        match notification {
            Notification::Request(SessionRequest::Shutdown) => self.shutdown().await,
            Notification::Request(SessionRequest::Reset) => self.reset("reset requested").await,
            Notification::Wifi(status) => info!(status = ?status, "Connectivity changed"),
            Notification::Button(event) => self.on_button(event).await,
            Notification::ControlChannel(command) => self.on_command(command).await,
            Notification::Capture(report) => self.on_capture(report).await,
            Notification::Playback(report) => self.on_playback(report).await,
        }
    }

    async fn on_button(&mut self, event: ButtonEvent) {
        if event.button != ButtonId::Home {
            debug!(button = ?event.button, edge = ?event.edge, "Unbound button");
            return;
        }

        match event.edge {
            ButtonEdge::Pressed => self.home_armed = true,
            ButtonEdge::Released | ButtonEdge::LongReleased => {
                if !std::mem::take(&mut self.home_armed) {
                    debug!("Release without a press ignored");
                    return;
                }
                self.on_home().await;
            }
        }
    }

    async fn on_home(&mut self) {
        match self.state {
            SessionState::Standby => self.connect().await,
            SessionState::Recording => {
                self.capture.stop();
                self.end_marker_due = true;
                self.transition(SessionState::StopRecording);
            }
            SessionState::Playing => {
                if self.playback_pending.is_some() {
                    self.playback_cancelled = true;
                    self.playback.stop();
                    info!("Playback cancelled by user");
                }
            }
            state => debug!(state = %state, "Home button ignored"),
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Chat { continue_chat } => {
                if self.state != SessionState::Playing {
                    self.violation(format!("chat command in state {}", self.state));
                    return;
                }
                self.continue_chat = continue_chat;
                if let Err(e) = write_marker(self.stream.as_ref(), Marker::End).await {
                    warn!(error = %e, "Failed to acknowledge end of reply");
                }
                info!(continue_chat, "Reply complete");
                // No observers is fine.
                let _ = self.chats.send(ChatAccepted { continue_chat });
            }
            Command::Control(ControlCommand::SttEnd) => {
                if self.state != SessionState::Recording {
                    debug!(state = %self.state, "Speech end ignored");
                    return;
                }
                self.capture.stop();
                self.end_marker_due = false;
                self.transition(SessionState::StopRecording);
            }
            Command::Control(ControlCommand::Volume(action)) => {
                debug!(action = ?action, "Volume is applied outside the session");
            }
        }
    }

    async fn on_capture(&mut self, report: WorkerReport) {
        if !self.accept_report(WorkerRole::Capture, &report) {
            return;
        }

        if !self.state.is_uploading() {
            debug!(state = %self.state, event = ?report.event, "Stale capture terminal");
            return;
        }

        match report.event {
            WorkerEvent::Finished(reason) => self.capture_finished(reason).await,
            WorkerEvent::Error(reason) => {
                warn!(reason = %reason, "Capture failed");
                self.reset("capture error").await;
            }
            WorkerEvent::Started => {}
        }
    }

    async fn capture_finished(&mut self, reason: FinishReason) {
        info!(reason = ?reason, "Upload finished");

        if std::mem::take(&mut self.end_marker_due)
            && let Err(e) = write_marker(self.stream.as_ref(), Marker::End).await
        {
            warn!(error = %e, "Failed to end upload");
            self.reset("end marker failed").await;
            return;
        }

        self.transition(SessionState::RecordingFinished);

        match self.playback.start() {
            Ok(activation) => {
                self.playback_pending = Some(activation);
                self.playback_cancelled = false;
                self.transition(SessionState::Playing);
            }
            Err(e) => {
                warn!(error = %e, "Playback did not start");
                self.reset("playback start failed").await;
            }
        }
    }

    async fn on_playback(&mut self, report: WorkerReport) {
        if !self.accept_report(WorkerRole::Playback, &report) {
            return;
        }

        if self.state != SessionState::Playing {
            debug!(state = %self.state, event = ?report.event, "Stale playback terminal");
            return;
        }

        match report.event {
            WorkerEvent::Finished(reason) => self.playback_finished(reason).await,
            WorkerEvent::Error(reason) => {
                warn!(reason = %reason, "Playback failed");
                self.reset("playback error").await;
            }
            WorkerEvent::Started => {}
        }
    }

    async fn playback_finished(&mut self, reason: FinishReason) {
        self.stream.close().await;
        self.transition(SessionState::PlayingFinished);

        let continue_chat = std::mem::take(&mut self.continue_chat);
        let cancelled =
            std::mem::take(&mut self.playback_cancelled) || reason == FinishReason::Cancelled;

        info!(reason = ?reason, continue_chat, cancelled, "Reply played");

        if continue_chat && !cancelled {
            self.connect().await;
        } else {
            self.transition(SessionState::Standby);
        }
    }

    /// Filters worker reports down to terminals of the awaited activation,
    /// clearing its slot. Returns `true` when the caller should act on it.
    fn accept_report(&mut self, role: WorkerRole, report: &WorkerReport) -> bool {
        let pending = match role {
            WorkerRole::Capture => &mut self.capture_pending,
            WorkerRole::Playback => &mut self.playback_pending,
        };

        if *pending != Some(report.activation) {
            debug!(
                role = %role,
                activation = %report.activation,
                event = ?report.event,
                "Report from a previous activation ignored"
            );
            return false;
        }

        if !report.event.is_terminal() {
            debug!(role = %role, activation = %report.activation, "Worker started");
            return false;
        }

        *pending = None;
        true
    }

    async fn connect(&mut self) {
        self.transition(SessionState::Connecting);

        if self.stream.is_open() || self.capture_pending.is_some() || self.playback_pending.is_some()
        {
            self.violation(format!(
                "connect while stream_open={} capture_pending={} playback_pending={}",
                self.stream.is_open(),
                self.capture_pending.is_some(),
                self.playback_pending.is_some()
            ));
            self.reset("connect guard").await;
            return;
        }

        if let Err(e) = self.stream.open(&self.settings.host, self.settings.port).await {
            warn!(error = %e, host = %self.settings.host, port = self.settings.port, "Connect failed");
            self.reset("connect failed").await;
            return;
        }

        if let Err(e) = write_marker(self.stream.as_ref(), Marker::Rec).await {
            warn!(error = %e, "Failed to announce upload");
            self.reset("rec marker failed").await;
            return;
        }

        match self.capture.start() {
            Ok(activation) => {
                self.capture_pending = Some(activation);
                self.end_marker_due = true;
                self.transition(SessionState::Recording);
            }
            Err(e) => {
                warn!(error = %e, "Capture did not start");
                self.reset("capture start failed").await;
            }
        }
    }

    async fn reset(&mut self, reason: &str) {
        let uploading = self.state.is_uploading();
        warn!(reason, from = %self.state, "Resetting session");

        self.transition(SessionState::Reset);
        self.teardown(uploading).await;
        self.transition(SessionState::Standby);
    }

    async fn shutdown(&mut self) {
        let uploading = self.state.is_uploading();
        info!(from = %self.state, "Shutting down session");

        self.teardown(uploading).await;
        self.transition(SessionState::Shutdown);
    }

    async fn teardown(&mut self, uploading: bool) {
        self.capture.stop();
        self.playback.stop();

        if uploading
            && self.stream.is_open()
            && let Err(e) = write_marker(self.stream.as_ref(), Marker::Brk).await
        {
            debug!(error = %e, "Abort marker not delivered");
        }

        self.stream.close().await;

        self.continue_chat = false;
        self.home_armed = false;
        self.end_marker_due = false;
        self.playback_cancelled = false;
    }

    fn transition(&mut self, next: SessionState) {
        if next == self.state {
            return;
        }
        info!(from = %self.state, to = %next, code = next.code(), "Session state changed");
        self.state = next;
        // No observers is fine.
        let _ = self.observers.send(next);
    }

    #[track_caller]
    fn violation(&self, reason: String) {
        let error = SessionError::ProtocolViolation {
            reason,
            location: ErrorLocation::from(Location::caller()),
        };
        warn!(error = %error, state = %self.state, "Ignoring notification");
    }

    /// Puts the machine into `state` without running any actions.
    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// Awaited activation ids, for assertions.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> (Option<ActivationId>, Option<ActivationId>) {
        (self.capture_pending, self.playback_pending)
    }
}
