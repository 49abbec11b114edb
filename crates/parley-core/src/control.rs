//! Control-channel message parsing.
//!
//! Inbound payloads are single JSON objects:
//!
//! ```text
//! {"header":"chat","continue":"true"}
//! {"header":"control","sub":{"part":"volume","action":"up"}}
//! {"header":"control","sub":{"part":"stt","action":"end"}}
//! ```
//!
//! Parsing is side-effect free; routing the result is up to the caller.

use crate::ParseError;

use serde_json::{Map, Value, json};

/// Outbound acknowledgement published after a `chat` command is accepted.
pub const CHAT_ACK: &str = r#"{"state":"ok"}"#;

/// Volume adjustment direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeAction {
    /// One step louder.
    Up,
    /// One step quieter.
    Down,
}

/// `control` header commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Adjust the output level.
    Volume(VolumeAction),
    /// The server detected end of speech; stop uploading.
    SttEnd,
}

/// A validated control-channel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// End of the server's reply, with whether the conversation continues.
    Chat {
        /// Loop back to recording after playback.
        continue_chat: bool,
    },
    /// Device control.
    Control(ControlCommand),
}

impl Command {
    /// Serializes the command to its wire form.
    pub fn to_json(&self) -> String {
        let value = match self {
            Command::Chat { continue_chat } => json!({
                "header": "chat",
                "continue": if *continue_chat { "true" } else { "false" },
            }),
            Command::Control(ControlCommand::Volume(action)) => json!({
                "header": "control",
                "sub": {
                    "part": "volume",
                    "action": match action {
                        VolumeAction::Up => "up",
                        VolumeAction::Down => "down",
                    },
                },
            }),
            Command::Control(ControlCommand::SttEnd) => json!({
                "header": "control",
                "sub": { "part": "stt", "action": "end" },
            }),
        };
        value.to_string()
    }
}

/// Parses one control-channel payload.
///
/// # Errors
///
/// Returns a [`ParseError`] describing the first structural problem found.
pub fn parse(text: &str) -> Result<Command, ParseError> {
    let root: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let root = root
        .as_object()
        .ok_or_else(|| ParseError::InvalidJson("payload is not an object".to_string()))?;

    let header = root
        .get("header")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingHeader)?;

    match header {
        "chat" => Ok(Command::Chat {
            continue_chat: root.get("continue").and_then(Value::as_str) == Some("true"),
        }),
        "control" => parse_control(root).map(Command::Control),
        other => Err(ParseError::UnknownHeader(other.to_string())),
    }
}

fn parse_control(root: &Map<String, Value>) -> Result<ControlCommand, ParseError> {
    let sub = root
        .get("sub")
        .and_then(Value::as_object)
        .ok_or(ParseError::MissingSub)?;

    let (Some(part), Some(action)) = (
        sub.get("part").and_then(Value::as_str),
        sub.get("action").and_then(Value::as_str),
    ) else {
        return Err(ParseError::MissingPartOrAction);
    };

    let unknown_action = || ParseError::UnknownAction {
        part: part.to_string(),
        action: action.to_string(),
    };

    match part {
        "volume" => match action {
            "up" => Ok(ControlCommand::Volume(VolumeAction::Up)),
            "down" => Ok(ControlCommand::Volume(VolumeAction::Down)),
            _ => Err(unknown_action()),
        },
        "stt" => match action {
            "end" => Ok(ControlCommand::SttEnd),
            _ => Err(unknown_action()),
        },
        other => Err(ParseError::UnknownPart(other.to_string())),
    }
}
