//! Control-channel message handling.
//!
//! Parses inbound payloads, applies volume changes locally and forwards
//! session commands to the router. `chat` commands the session accepts are
//! acknowledged on the response topic by [`ChatAcknowledger`].

use crate::AppResult;

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{
    CHAT_ACK, ChatAccepted, Command, ControlCommand, Notification, RouterSender, VolumeAction,
    Volume, control,
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

/// Outbound side of the control channel.
#[async_trait]
pub trait ControlPublisher: Send + Sync {
    /// Publishes `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> AppResult<()>;
}

/// Routes parsed control-channel commands.
pub struct ControlHandler {
    router: RouterSender,
    volume: Volume,
}

impl ControlHandler {
    /// A handler posting to `router` and stepping `volume`.
    pub fn new(router: RouterSender, volume: Volume) -> Self {
        Self { router, volume }
    }

    /// Handles one inbound payload.
    ///
    /// Malformed payloads are logged and dropped. Errors are returned only
    /// when the router is gone.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub async fn handle_payload(&self, payload: &str) -> AppResult<()> {
        let command = match control::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(reason = %e.reason(), payload, "Control message dropped");
                return Ok(());
            }
        };

        match command {
            Command::Chat { .. } => {
                self.router.post(Notification::ControlChannel(command)).await?;
            }
            Command::Control(ControlCommand::Volume(action)) => {
                let level = match action {
                    VolumeAction::Up => self.volume.step_up(),
                    VolumeAction::Down => self.volume.step_down(),
                };
                info!(action = ?action, level, "Volume changed");
                self.router.post(Notification::ControlChannel(command)).await?;
            }
            Command::Control(ControlCommand::SttEnd) => {
                debug!("Speech end from server");
                self.router.post(Notification::ControlChannel(command)).await?;
            }
        }

        Ok(())
    }
}

/// Publishes `{"state":"ok"}` for every `chat` the session machine accepts.
pub struct ChatAcknowledger {
    publisher: Arc<dyn ControlPublisher>,
    response_topic: String,
}

impl ChatAcknowledger {
    /// Acknowledges on `response_topic` through `publisher`.
    pub fn new(publisher: Arc<dyn ControlPublisher>, response_topic: String) -> Self {
        Self {
            publisher,
            response_topic,
        }
    }

    /// Publishes until shutdown or until the session machine is gone.
    #[instrument(skip_all, fields(topic = %self.response_topic))]
    pub async fn run(
        self,
        mut accepted: broadcast::Receiver<ChatAccepted>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                received = accepted.recv() => match received {
                    Ok(chat) => {
                        match self.publisher.publish(&self.response_topic, CHAT_ACK).await {
                            Ok(()) => debug!(continue_chat = chat.continue_chat, "Chat acknowledged"),
                            Err(e) => warn!(error = %e, "Chat acknowledgement not published"),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Chat acknowledgements skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        debug!("Chat acknowledger stopped");
    }
}
