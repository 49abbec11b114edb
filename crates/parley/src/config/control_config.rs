use crate::config::{default_response_topic, default_socket_path};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Local control-channel bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Unix socket the pub/sub relay connects to.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Topic acknowledgements are published on.
    #[serde(default = "default_response_topic")]
    pub response_topic: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            response_topic: default_response_topic(),
        }
    }
}
