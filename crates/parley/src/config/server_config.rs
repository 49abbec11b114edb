use crate::config::{default_host, default_port, default_timeout_ms};

use std::{path::PathBuf, time::Duration};

use parley_core::TlsSettings;
use serde::{Deserialize, Serialize};

/// Voice server connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host name or address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Stream open/read/write timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// TLS material; plain TCP when absent.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl ServerConfig {
    /// Stream timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
            tls: None,
        }
    }
}

/// TLS certificate paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM bundle of trusted CA certificates.
    pub ca_cert: PathBuf,
    /// PEM client certificate chain for mutual TLS.
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    /// PEM private key for `client_cert`.
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    /// Certificate name override; the host is used when absent.
    #[serde(default)]
    pub server_name: Option<String>,
}

impl From<&TlsConfig> for TlsSettings {
    fn from(config: &TlsConfig) -> Self {
        TlsSettings {
            ca_cert: config.ca_cert.clone(),
            client_cert: config.client_cert.clone(),
            client_key: config.client_key.clone(),
            server_name: config.server_name.clone(),
        }
    }
}
