//! Parley: push-to-talk voice-chat appliance.

mod app;
mod button_monitor;
mod config;
mod control_bridge;
mod control_handler;
mod error;
mod logging;
mod press_tracker;

pub(crate) use {
    app::App,
    button_monitor::ButtonMonitor,
    control_bridge::ControlBridge,
    control_handler::{ChatAcknowledger, ControlHandler, ControlPublisher},
    error::{AppError, Result as AppResult},
    press_tracker::PressTracker,
};

use crate::config::Config;

use std::process::ExitCode;

use tracing::error;

/// Application entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Flushes file logs on drop; held until main returns.
    let _log_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialise logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = config.validate() {
        error!(error = ?e, "Configuration invalid");
        return ExitCode::FAILURE;
    }

    match App::new(config).run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "App error");
            ExitCode::FAILURE
        }
    }
}
