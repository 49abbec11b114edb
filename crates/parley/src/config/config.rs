//! Configuration management for parley.
//!
//! Handles loading and saving TOML configuration files with cross-platform
//! paths, explicit validation, and atomic write operations.

use crate::{
    AppError, AppResult,
    config::{
        AudioConfig, ButtonsConfig, ControlConfig, DeviceConfig, LoggingConfig, ServerConfig,
    },
};

use std::{
    fs,
    io::Write,
    panic::Location,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use error_location::ErrorLocation;
use parley_core::{DeviceIdentity, SessionSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "PARLEY_CONFIG";

/// Main configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Voice server connection.
    #[serde(default)]
    pub server: ServerConfig,
    /// Device identity source.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Button input.
    #[serde(default)]
    pub buttons: ButtonsConfig,
    /// Audio pipelines.
    #[serde(default)]
    pub audio: AudioConfig,
    /// Control-channel bridge.
    #[serde(default)]
    pub control: ControlConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `PARLEY_CONFIG` or the platform config
    /// directory, creating a default file if none exists.
    ///
    /// Note: This does NOT validate the result. Call [`validate`](Self::validate)
    /// before wiring the session.
    #[track_caller]
    #[instrument]
    pub fn load() -> AppResult<Self> {
        let config_path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => Self::config_path()?,
        };
        Self::load_from(&config_path)
    }

    /// Load configuration from `config_path`, creating a default file there
    /// if it does not exist.
    #[track_caller]
    #[instrument]
    pub fn load_from(config_path: &Path) -> AppResult<Self> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path).map_err(|e| AppError::ConfigError {
                reason: format!("Failed to read config: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })?;

            let config: Config = toml::from_str(&contents).map_err(|e| AppError::ConfigError {
                reason: format!("Failed to parse config: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })?;

            info!(config_path = ?config_path, "Configuration loaded");

            Ok(config)
        } else {
            info!(config_path = ?config_path, "No config found, creating default");
            let config = Config::default();
            config.save_to(config_path)?;
            warn!(
                host = %config.server.host,
                "Default config created. Set the server host and TLS material before use."
            );
            Ok(config)
        }
    }

    /// Check values that serde accepts but the session cannot use.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |reason: String| AppError::ConfigError {
            reason,
            location: ErrorLocation::from(Location::caller()),
        };

        if self.server.host.trim().is_empty() {
            return Err(invalid("server.host must not be empty".to_string()));
        }
        if self.server.port == 0 {
            return Err(invalid("server.port must not be 0".to_string()));
        }
        if self.server.timeout_ms == 0 {
            return Err(invalid("server.timeout_ms must be positive".to_string()));
        }
        if let Some(tls) = &self.server.tls
            && tls.client_cert.is_some() != tls.client_key.is_some()
        {
            return Err(invalid(
                "server.tls.client_cert and client_key must be set together".to_string(),
            ));
        }
        if let Some(address) = &self.device.hardware_address
            && DeviceIdentity::parse(address).is_none()
        {
            return Err(invalid(format!(
                "device.hardware_address '{}' is not a hardware address",
                address
            )));
        }
        if self.buttons.aux_key == Some(self.buttons.home_key) {
            return Err(invalid(
                "buttons.aux_key must differ from buttons.home_key".to_string(),
            ));
        }
        if self.buttons.long_press_ms == 0 {
            return Err(invalid("buttons.long_press_ms must be positive".to_string()));
        }
        if self.audio.upload_sample_rate == 0 || self.audio.upload_channels == 0 {
            return Err(invalid("audio upload format must be non-zero".to_string()));
        }
        if self.audio.reply_sample_rate == 0 || self.audio.reply_channels == 0 {
            return Err(invalid("audio reply format must be non-zero".to_string()));
        }
        if self.audio.volume > parley_core::audio::MAX_VOLUME {
            return Err(invalid(format!(
                "audio.volume {} exceeds {}",
                self.audio.volume,
                parley_core::audio::MAX_VOLUME
            )));
        }
        if self.control.response_topic.trim().is_empty() {
            return Err(invalid("control.response_topic must not be empty".to_string()));
        }

        debug!("Configuration valid");
        Ok(())
    }

    /// Where the session machine connects.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            host: self.server.host.clone(),
            port: self.server.port,
        }
    }

    /// Save configuration to `config_path` using the atomic write pattern.
    ///
    /// Writes to a temporary file first, then renames to prevent corruption
    /// if the process crashes during the write.
    #[track_caller]
    #[instrument(skip(self))]
    pub fn save_to(&self, config_path: &Path) -> AppResult<()> {
        let contents = toml::to_string_pretty(self).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        if let Some(parent) = config_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
            debug!(config_dir = ?parent, "Created config directory");
        }

        let temp_path = config_path.with_extension("toml.tmp");

        let mut temp_file = fs::File::create(&temp_path).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to create temp config file: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        temp_file
            .write_all(contents.as_bytes())
            .map_err(|e| AppError::ConfigError {
                reason: format!("Failed to write temp config file: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })?;

        temp_file.sync_all().map_err(|e| AppError::ConfigError {
            reason: format!("Failed to sync temp config file: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        fs::rename(&temp_path, config_path).map_err(|e| AppError::ConfigError {
            reason: format!("Failed to rename temp config to final: {}", e),
            location: ErrorLocation::from(Location::caller()),
        })?;

        info!(config_path = ?config_path, "Configuration saved (atomic write)");

        Ok(())
    }

    #[track_caller]
    fn config_path() -> AppResult<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "parley", "Parley").ok_or_else(|| {
            AppError::ConfigError {
                reason: "Failed to get config directory".to_string(),
                location: ErrorLocation::from(Location::caller()),
            }
        })?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }
}
