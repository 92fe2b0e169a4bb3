//! Command dispatch.
//!
//! Dispatchers run on the recognition worker, so they must return quickly.

use crate::actuator::LedStrip;
use crate::command::{Action, Command, Vocabulary};
use std::sync::{Arc, Mutex};

/// Receives every command the recognition worker recognises.
pub trait CommandDispatcher: Send + Sync {
    fn dispatch(&self, command: &Command);
}

impl<T: CommandDispatcher + ?Sized> CommandDispatcher for Arc<T> {
    fn dispatch(&self, command: &Command) {
        (**self).dispatch(command)
    }
}

/// Maps vocabulary phrases to actuator actions.
///
/// Phrases outside the vocabulary are logged and dropped.
pub struct ActionDispatcher {
    vocabulary: Vocabulary,
    led: Arc<dyn LedStrip>,
}

impl ActionDispatcher {
    pub fn new(vocabulary: Vocabulary, led: Arc<dyn LedStrip>) -> Self {
        Self { vocabulary, led }
    }

    fn run(&self, action: Action) -> crate::error::Result<()> {
        match action {
            Action::LightOn => self.led.start_rainbow(),
            Action::LightOff => self.led.clear(),
        }
    }
}

impl CommandDispatcher for ActionDispatcher {
    fn dispatch(&self, command: &Command) {
        let Some(entry) = self.vocabulary.lookup(command) else {
            log::warn!("Unrecognised command '{}'", command);
            return;
        };

        log::info!("Command '{}' (id {}): {}", command, entry.id, entry.action);
        if let Err(e) = self.run(entry.action) {
            log::warn!("Command '{}' failed: {}", command, e);
        }
    }
}

/// Records dispatched commands. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct CollectingDispatcher {
    commands: Arc<Mutex<Vec<String>>>,
}

impl CollectingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.commands.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl CommandDispatcher for CollectingDispatcher {
    fn dispatch(&self, command: &Command) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.as_str().to_string());
        }
    }
}
