use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};

use tracing::info;

/// Change applied by one volume up/down command.
pub const VOLUME_STEP: u8 = 10;

/// Loudest level.
pub const MAX_VOLUME: u8 = 100;

/// Shared output level, 0 to 100. Clones share the level.
#[derive(Debug, Clone)]
pub struct Volume {
    level: Arc<AtomicU8>,
}

impl Volume {
    /// Starts at `level`, clamped to range.
    pub fn new(level: u8) -> Self {
        Self {
            level: Arc::new(AtomicU8::new(level.min(MAX_VOLUME))),
        }
    }

    /// Current level.
    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Acquire)
    }

    /// Linear gain for the current level.
    pub fn gain(&self) -> f32 {
        f32::from(self.level()) / f32::from(MAX_VOLUME)
    }

    /// One step louder. Returns the new level.
    pub fn step_up(&self) -> u8 {
        self.adjust(|level| level.saturating_add(VOLUME_STEP).min(MAX_VOLUME))
    }

    /// One step quieter. Returns the new level.
    pub fn step_down(&self) -> u8 {
        self.adjust(|level| level.saturating_sub(VOLUME_STEP))
    }

    fn adjust(&self, f: impl Fn(u8) -> u8) -> u8 {
        let previous = self
            .level
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |level| Some(f(level)))
            .unwrap_or_else(|level| level);
        let level = f(previous);
        info!(level, "Volume changed");
        level
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(70)
    }
}
