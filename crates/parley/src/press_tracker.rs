use crate::config::ButtonsConfig;

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use parley_core::{ButtonEdge, ButtonEvent, ButtonId};

/// Key value for a press in Linux input events.
pub(crate) const KEY_PRESSED: i32 = 1;
/// Key value for a release in Linux input events.
pub(crate) const KEY_RELEASED: i32 = 0;

/// Turns raw key codes and values into button edges.
///
/// Autorepeat is dropped, a second press while already down is ignored, and a
/// release after a hold of at least the long-press threshold becomes
/// [`ButtonEdge::LongReleased`].
#[derive(Debug)]
pub struct PressTracker {
    home_key: u16,
    aux_key: Option<u16>,
    long_press: Duration,
    held_since: HashMap<ButtonId, Instant>,
}

impl PressTracker {
    /// A tracker for the configured key codes.
    pub fn new(config: &ButtonsConfig) -> Self {
        Self {
            home_key: config.home_key,
            aux_key: config.aux_key,
            long_press: config.long_press(),
            held_since: HashMap::new(),
        }
    }

    /// Feeds one key event observed at `now`.
    pub fn on_key(&mut self, code: u16, value: i32, now: Instant) -> Option<ButtonEvent> {
        let button = self.button(code)?;

        let edge = match value {
            KEY_PRESSED => {
                if self.held_since.contains_key(&button) {
                    return None;
                }
                self.held_since.insert(button, now);
                ButtonEdge::Pressed
            }
            KEY_RELEASED => {
                let pressed_at = self.held_since.remove(&button)?;
                if now.saturating_duration_since(pressed_at) >= self.long_press {
                    ButtonEdge::LongReleased
                } else {
                    ButtonEdge::Released
                }
            }
            _ => return None,
        };

        Some(ButtonEvent { button, edge })
    }

    fn button(&self, code: u16) -> Option<ButtonId> {
        if code == self.home_key {
            Some(ButtonId::Home)
        } else if Some(code) == self.aux_key {
            Some(ButtonId::Aux)
        } else {
            None
        }
    }
}
