use crate::config::default_log_filter;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Log output settings. `RUST_LOG` overrides `filter` when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON lines instead of plain text.
    #[serde(default)]
    pub json: bool,
    /// Write daily-rolling files here instead of stderr.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
            directory: None,
        }
    }
}
