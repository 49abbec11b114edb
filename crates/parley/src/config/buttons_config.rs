use crate::config::{default_aux_key, default_button_device, default_home_key, default_long_press_ms};

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Physical button input settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonsConfig {
    /// Linux input-event device exposing the buttons.
    #[serde(default = "default_button_device")]
    pub device: PathBuf,
    /// Key code of the home button.
    #[serde(default = "default_home_key")]
    pub home_key: u16,
    /// Key code of the auxiliary button, if wired.
    #[serde(default = "default_aux_key")]
    pub aux_key: Option<u16>,
    /// Holds longer than this are reported as long releases.
    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,
}

impl ButtonsConfig {
    /// Long-press threshold as a duration.
    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }
}

impl Default for ButtonsConfig {
    fn default() -> Self {
        Self {
            device: default_button_device(),
            home_key: default_home_key(),
            aux_key: default_aux_key(),
            long_press_ms: default_long_press_ms(),
        }
    }
}
