//! Recognised commands, the fixed vocabulary and dispatch.

pub mod dispatch;

use crate::defaults::DEFAULT_COMMANDS;
use crate::engine::{CommandClassifier, EngineError};
use crate::error::{Result, VoicectlError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use dispatch::{ActionDispatcher, CollectingDispatcher, CommandDispatcher};

/// Whitespace stripped around a recognised phrase.
const PHRASE_WHITESPACE: &[char] = &[' ', '\t', '\r', '\n'];

/// A recognised command phrase with surrounding whitespace removed.
///
/// Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    /// Trim `raw`; `None` if nothing is left.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim_matches(PHRASE_WHITESPACE);
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a vocabulary phrase does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Start the LED rainbow effect.
    LightOn,
    /// Switch the LED off.
    LightOff,
}

impl FromStr for Action {
    type Err = VoicectlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "light_on" => Ok(Action::LightOn),
            "light_off" => Ok(Action::LightOff),
            other => Err(VoicectlError::ConfigInvalidValue {
                key: "commands.action".to_string(),
                message: format!("unknown action '{}'", other),
            }),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::LightOn => f.write_str("light_on"),
            Action::LightOff => f.write_str("light_off"),
        }
    }
}

/// One registered phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub id: u16,
    pub phrase: String,
    pub action: Action,
}

/// The closed set of command phrases the classifier listens for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    entries: Vec<VocabularyEntry>,
}

impl Vocabulary {
    /// Build a vocabulary, rejecting duplicate ids/phrases and empty phrases.
    ///
    /// Phrases are stored trimmed.
    pub fn new(entries: Vec<VocabularyEntry>) -> Result<Self> {
        let mut checked: Vec<VocabularyEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(phrase) = Command::parse(&entry.phrase) else {
                return Err(VoicectlError::Vocabulary {
                    message: format!("command {} has an empty phrase", entry.id),
                });
            };
            if checked.iter().any(|e| e.id == entry.id) {
                return Err(VoicectlError::Vocabulary {
                    message: format!("duplicate command id {}", entry.id),
                });
            }
            if checked.iter().any(|e| e.phrase == phrase.as_str()) {
                return Err(VoicectlError::Vocabulary {
                    message: format!("duplicate phrase '{}'", phrase),
                });
            }
            checked.push(VocabularyEntry {
                phrase: phrase.0,
                ..entry
            });
        }
        Ok(Self { entries: checked })
    }

    pub fn entries(&self) -> &[VocabularyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, command: &Command) -> Option<&VocabularyEntry> {
        self.entries.iter().find(|e| e.phrase == command.as_str())
    }

    /// Replace the classifier's vocabulary with this one.
    pub fn install(&self, classifier: &mut dyn CommandClassifier) -> std::result::Result<(), EngineError> {
        classifier.clear_commands()?;
        for entry in &self.entries {
            classifier.add_command(entry.id, &entry.phrase)?;
        }
        classifier.commit_commands()?;
        log::debug!("Installed {} command phrases", self.entries.len());
        Ok(())
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        let entries = DEFAULT_COMMANDS
            .iter()
            .filter_map(|(id, phrase, action)| {
                action.parse().ok().map(|action| VocabularyEntry {
                    id: *id,
                    phrase: (*phrase).to_string(),
                    action,
                })
            })
            .collect();
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockClassifier;

    fn entry(id: u16, phrase: &str, action: Action) -> VocabularyEntry {
        VocabularyEntry {
            id,
            phrase: phrase.to_string(),
            action,
        }
    }

    #[test]
    fn test_command_trims_whitespace() {
        let command = Command::parse(" \t light on\r\n").unwrap();
        assert_eq!(command.as_str(), "light on");
        assert!(Command::parse(" \r\n\t").is_none());
        assert!(Command::parse("").is_none());
    }

    #[test]
    fn test_command_keeps_inner_spacing_and_case() {
        assert_eq!(Command::parse("Light  On").unwrap().as_str(), "Light  On");
    }

    #[test]
    fn test_action_names_round_trip() {
        for action in [Action::LightOn, Action::LightOff] {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
        assert!(matches!(
            "dim".parse::<Action>(),
            Err(VoicectlError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn test_default_vocabulary() {
        let vocabulary = Vocabulary::default();
        assert_eq!(vocabulary.len(), 2);
        let on = vocabulary.lookup(&Command::parse("light on").unwrap()).unwrap();
        assert_eq!(on.id, 1);
        assert_eq!(on.action, Action::LightOn);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let vocabulary = Vocabulary::default();
        assert!(vocabulary.lookup(&Command::parse("Light On").unwrap()).is_none());
    }

    #[test]
    fn test_vocabulary_rejects_duplicates_and_empty() {
        let dup_id = Vocabulary::new(vec![
            entry(1, "light on", Action::LightOn),
            entry(1, "light off", Action::LightOff),
        ]);
        assert!(matches!(dup_id, Err(VoicectlError::Vocabulary { .. })));

        let dup_phrase = Vocabulary::new(vec![
            entry(1, "light on", Action::LightOn),
            entry(2, " light on ", Action::LightOff),
        ]);
        assert!(matches!(dup_phrase, Err(VoicectlError::Vocabulary { .. })));

        let empty = Vocabulary::new(vec![entry(3, "  ", Action::LightOn)]);
        match empty {
            Err(VoicectlError::Vocabulary { message }) => assert!(message.contains("empty")),
            other => panic!("Expected Vocabulary error, got {:?}", other),
        }
    }

    #[test]
    fn test_install_clears_adds_commits() {
        let mut classifier = MockClassifier::new();
        let probe = classifier.probe();
        let vocabulary = Vocabulary::new(vec![entry(7, " lamp ", Action::LightOn)]).unwrap();

        vocabulary.install(&mut classifier).unwrap();

        assert_eq!(probe.vocabulary(), vec![(7, "lamp".to_string())]);
        assert_eq!(probe.commits(), 1);
    }
}
