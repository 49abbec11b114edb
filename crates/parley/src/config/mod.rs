mod audio_config;
mod buttons_config;
#[allow(clippy::module_inception)]
mod config;
mod control_config;
mod device_config;
mod logging_config;
mod server_config;

pub(crate) use {
    audio_config::{AudioConfig, ReplyCodec},
    buttons_config::ButtonsConfig,
    config::Config,
    control_config::ControlConfig,
    device_config::DeviceConfig,
    logging_config::LoggingConfig,
    server_config::ServerConfig,
};

pub(crate) const DEFAULT_HOST: &str = "voice.local";
pub(crate) const DEFAULT_PORT: u16 = 8443;
pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 2000;
pub(crate) const DEFAULT_INTERFACE: &str = "wlan0";
pub(crate) const DEFAULT_BUTTON_DEVICE: &str = "/dev/input/by-path/platform-gpio-keys-event";
/// `BTN_0`.
pub(crate) const DEFAULT_HOME_KEY: u16 = 0x100;
/// `BTN_1`.
pub(crate) const DEFAULT_AUX_KEY: u16 = 0x101;
pub(crate) const DEFAULT_LONG_PRESS_MS: u64 = 800;
pub(crate) const DEFAULT_UPLOAD_SAMPLE_RATE: u32 = 16_000;
pub(crate) const DEFAULT_UPLOAD_CHANNELS: u16 = 1;
pub(crate) const DEFAULT_REPLY_SAMPLE_RATE: u32 = 16_000;
pub(crate) const DEFAULT_REPLY_CHANNELS: u16 = 1;
pub(crate) const DEFAULT_VOLUME: u8 = 70;
pub(crate) const DEFAULT_SOCKET_PATH: &str = "/tmp/parley-control.sock";
pub(crate) const DEFAULT_RESPONSE_TOPIC: &str = "parley/response";
pub(crate) const DEFAULT_LOG_FILTER: &str = "parley=info,parley_core=info";

pub(crate) fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

pub(crate) fn default_port() -> u16 {
    DEFAULT_PORT
}

pub(crate) fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

pub(crate) fn default_interface() -> String {
    DEFAULT_INTERFACE.to_string()
}

pub(crate) fn default_button_device() -> std::path::PathBuf {
    std::path::PathBuf::from(DEFAULT_BUTTON_DEVICE)
}

pub(crate) fn default_home_key() -> u16 {
    DEFAULT_HOME_KEY
}

pub(crate) fn default_aux_key() -> Option<u16> {
    Some(DEFAULT_AUX_KEY)
}

pub(crate) fn default_long_press_ms() -> u64 {
    DEFAULT_LONG_PRESS_MS
}

pub(crate) fn default_upload_sample_rate() -> u32 {
    DEFAULT_UPLOAD_SAMPLE_RATE
}

pub(crate) fn default_upload_channels() -> u16 {
    DEFAULT_UPLOAD_CHANNELS
}

pub(crate) fn default_reply_sample_rate() -> u32 {
    DEFAULT_REPLY_SAMPLE_RATE
}

pub(crate) fn default_reply_channels() -> u16 {
    DEFAULT_REPLY_CHANNELS
}

pub(crate) fn default_idle_limit() -> u32 {
    parley_core::worker::DEFAULT_IDLE_LIMIT
}

pub(crate) fn default_volume() -> u8 {
    DEFAULT_VOLUME
}

pub(crate) fn default_socket_path() -> std::path::PathBuf {
    std::path::PathBuf::from(DEFAULT_SOCKET_PATH)
}

pub(crate) fn default_response_topic() -> String {
    DEFAULT_RESPONSE_TOPIC.to_string()
}

pub(crate) fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}
