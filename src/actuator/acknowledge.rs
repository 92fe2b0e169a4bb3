//! Feedback given when the wake phrase is heard.

use crate::actuator::led::{LedMode, LedStrip, Rgb};
use crate::engine::WakeEvent;
use std::sync::{Arc, Mutex};

/// Colour shown while waiting for a command.
pub const LISTENING: Rgb = Rgb::new(0, 0, 30);

/// Best-effort wake feedback, called from the recognition worker.
///
/// Implementations must return quickly and never fail the cycle.
pub trait WakeAcknowledger: Send + Sync {
    /// The wake phrase was heard; a command may follow.
    fn acknowledge(&self, wake: &WakeEvent);

    /// Command listening ended, by a recognised command or a timeout.
    /// Called before the command is dispatched.
    fn listening_ended(&self) {}
}

impl<F> WakeAcknowledger for F
where
    F: Fn(&WakeEvent) + Send + Sync,
{
    fn acknowledge(&self, wake: &WakeEvent) {
        self(wake)
    }
}

/// Logs the wake event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAcknowledger;

impl WakeAcknowledger for LogAcknowledger {
    fn acknowledge(&self, wake: &WakeEvent) {
        log::info!(
            "Wake phrase detected (model {}, word {}), listening for a command",
            wake.model_index,
            wake.word_index
        );
    }
}

/// Shows [`LISTENING`] on the LED while a command is expected, then puts
/// back whatever the LED showed before the wake.
///
/// A wake that times out leaves the lamp as it was. A recognised command is
/// dispatched after the restore, so its action has the last word.
pub struct LedAcknowledger {
    led: Arc<dyn LedStrip>,
    saved: Mutex<Option<LedMode>>,
}

impl LedAcknowledger {
    pub fn new(led: Arc<dyn LedStrip>) -> Self {
        Self {
            led,
            saved: Mutex::new(None),
        }
    }
}

impl WakeAcknowledger for LedAcknowledger {
    fn acknowledge(&self, wake: &WakeEvent) {
        LogAcknowledger.acknowledge(wake);
        let Ok(mut saved) = self.saved.lock() else {
            log::warn!("Wake feedback skipped: LED state lock poisoned");
            return;
        };
        // A repeated wake keeps the mode saved by the first one.
        if saved.is_none() {
            match self.led.current_mode() {
                Ok(mode) => *saved = Some(mode),
                Err(e) => {
                    log::warn!("Wake feedback failed: {}", e);
                    return;
                }
            }
        }
        if let Err(e) = self.led.set_color(LISTENING) {
            log::warn!("Wake feedback failed: {}", e);
        }
    }

    fn listening_ended(&self) {
        let previous = match self.saved.lock() {
            Ok(mut saved) => saved.take(),
            Err(_) => None,
        };
        let Some(mode) = previous else {
            return;
        };
        if let Err(e) = self.led.set_mode(mode) {
            log::warn!("Wake feedback failed: {}", e);
        }
    }
}
