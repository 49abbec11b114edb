//! Physical button monitor.
//!
//! Reads key events from a Linux input device (`gpio-keys` style), turns them
//! into button edges with a [`PressTracker`], and posts them to the router.

use crate::{AppResult, PressTracker, config::ButtonsConfig};

use std::{path::PathBuf, time::Instant};

use parley_core::{Notification, RouterSender};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

/// Forwards button edges from an input device to the session router.
pub struct ButtonMonitor {
    device: PathBuf,
    tracker: PressTracker,
    router: RouterSender,
}

impl ButtonMonitor {
    /// A monitor for the configured device and key codes.
    pub fn new(config: &ButtonsConfig, router: RouterSender) -> Self {
        Self {
            device: config.device.clone(),
            tracker: PressTracker::new(config),
            router,
        }
    }

    /// Run the monitor until a shutdown signal is received.
    #[cfg(target_os = "linux")]
    #[instrument(skip(self, shutdown_rx), fields(device = ?self.device))]
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> AppResult<()> {
        use crate::AppError;
        use error_location::ErrorLocation;
        use evdev::{Device, EventType};
        use std::panic::Location;

        let device = Device::open(&self.device).map_err(|e| AppError::ButtonDeviceError {
            reason: format!("Failed to open {}: {}", self.device.display(), e),
            location: ErrorLocation::from(Location::caller()),
        })?;
        let name = device.name().unwrap_or("unnamed").to_string();
        let mut events = device
            .into_event_stream()
            .map_err(|e| AppError::ButtonDeviceError {
                reason: format!("Failed to stream events: {}", e),
                location: ErrorLocation::from(Location::caller()),
            })?;

        info!(name = %name, "Button monitor started");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("Button monitor shutting down");
                    break;
                }
                event = events.next_event() => {
                    let event = event.map_err(|e| AppError::ButtonDeviceError {
                        reason: format!("Failed to read event: {}", e),
                        location: ErrorLocation::from(Location::caller()),
                    })?;
                    if event.event_type() == EventType::KEY {
                        self.forward(event.code(), event.value()).await?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Input devices are Linux-only; elsewhere the monitor idles until shutdown.
    #[cfg(not(target_os = "linux"))]
    #[instrument(skip(self, shutdown_rx), fields(device = ?self.device))]
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> AppResult<()> {
        tracing::warn!("Button input is not supported on this platform");
        let _ = shutdown_rx.changed().await;
        Ok(())
    }

    /// Feeds one raw key event through the tracker and posts any edge.
    pub(crate) async fn forward(&mut self, code: u16, value: i32) -> AppResult<()> {
        if let Some(event) = self.tracker.on_key(code, value, Instant::now()) {
            debug!(button = ?event.button, edge = ?event.edge, "Button edge");
            self.router.post(Notification::Button(event)).await?;
        }
        Ok(())
    }
}
