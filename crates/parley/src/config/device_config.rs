use crate::{AppError, AppResult, config::default_interface};

use std::{fs, panic::Location, path::PathBuf};

use error_location::ErrorLocation;
use parley_core::DeviceIdentity;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where the device identity comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Explicit hardware address (`xx:xx:xx:xx:xx:xx`); overrides `interface`.
    #[serde(default)]
    pub hardware_address: Option<String>,
    /// Network interface whose address identifies the device.
    #[serde(default = "default_interface")]
    pub interface: String,
}

impl DeviceConfig {
    /// Resolves the identity sent in the auth handshake.
    #[track_caller]
    pub fn identity(&self) -> AppResult<DeviceIdentity> {
        match &self.hardware_address {
            Some(address) => Self::parse(address, "hardware_address"),
            None => {
                let path = self.sysfs_address_path();
                let text = fs::read_to_string(&path).map_err(|e| AppError::ConfigError {
                    reason: format!("Failed to read {}: {}", path.display(), e),
                    location: ErrorLocation::from(Location::caller()),
                })?;
                debug!(interface = %self.interface, "Hardware address read from sysfs");
                Self::parse(&text, &path.display().to_string())
            }
        }
    }

    fn sysfs_address_path(&self) -> PathBuf {
        PathBuf::from("/sys/class/net")
            .join(&self.interface)
            .join("address")
    }

    #[track_caller]
    fn parse(text: &str, origin: &str) -> AppResult<DeviceIdentity> {
        DeviceIdentity::parse(text).ok_or_else(|| AppError::ConfigError {
            reason: format!("Invalid hardware address '{}' in {}", text.trim(), origin),
            location: ErrorLocation::from(Location::caller()),
        })
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hardware_address: None,
            interface: default_interface(),
        }
    }
}
