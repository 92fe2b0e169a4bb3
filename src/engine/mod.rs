//! Speech engine capabilities driven by the pipeline.
//!
//! The acoustic front-end (noise suppression, wake-word spotting) and the
//! command classifier are vendor components. The pipeline only needs the
//! small contract defined here, which keeps the recognition state machine
//! testable with [`mock`] doubles and runnable on a host with [`scripted`].

pub mod mock;
pub mod scripted;

use crate::error::VoicectlError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use mock::{MockClassifier, MockFrontEnd};
pub use scripted::{Script, ScriptedClassifier, ScriptedFrontEnd, Utterance};

/// Errors reported by engine capabilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("front-end unavailable: {0}")]
    FrontEndUnavailable(String),

    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("feed rejected: {0}")]
    Feed(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("vocabulary rejected: {0}")]
    Vocabulary(String),
}

impl From<EngineError> for VoicectlError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::FrontEndUnavailable(message) => {
                VoicectlError::FrontEndUnavailable { message }
            }
            EngineError::ClassifierUnavailable(message) => {
                VoicectlError::ClassifierUnavailable { message }
            }
            EngineError::Feed(message) | EngineError::Fetch(message) => {
                VoicectlError::EngineFetch { message }
            }
            EngineError::Vocabulary(message) => VoicectlError::Vocabulary { message },
        }
    }
}

/// Wake phrase detection reported by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeEvent {
    /// Which wake model fired.
    pub model_index: usize,
    /// Which wake word of that model fired.
    pub word_index: usize,
}

/// One processed chunk produced by the front-end.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisResult {
    /// Processed (noise suppressed) audio, one chunk long.
    pub samples: Vec<i16>,
    /// Set when the wake phrase ended inside this chunk.
    pub wake: Option<WakeEvent>,
}

impl AnalysisResult {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples,
            wake: None,
        }
    }

    pub fn with_wake(mut self, model_index: usize, word_index: usize) -> Self {
        self.wake = Some(WakeEvent {
            model_index,
            word_index,
        });
        self
    }
}

/// Acoustic front-end: consumes fixed-size chunks, produces analysis results.
///
/// Shared by the capture worker (feed) and the recognition worker (fetch), so
/// implementations handle their own synchronisation.
pub trait FrontEndEngine: Send + Sync {
    /// Samples per feed call, negotiated once per session.
    fn chunk_size(&self) -> usize;

    /// Hand one narrowed chunk to the engine. Must not block the caller.
    fn feed(&self, samples: &[i16]) -> Result<(), EngineError>;

    /// Wait up to `timeout` for the next analysis result.
    ///
    /// Vendor front-ends block until a result is ready. The recognition
    /// worker passes a bounded timeout instead so it can notice a cleared
    /// running flag, and adapters over a blocking vendor call must honour it.
    ///
    /// # Returns
    /// `Ok(None)` when nothing became ready in time.
    fn fetch(&self, timeout: Duration) -> Result<Option<AnalysisResult>, EngineError>;
}

impl<T: FrontEndEngine + ?Sized> FrontEndEngine for Arc<T> {
    fn chunk_size(&self) -> usize {
        (**self).chunk_size()
    }

    fn feed(&self, samples: &[i16]) -> Result<(), EngineError> {
        (**self).feed(samples)
    }

    fn fetch(&self, timeout: Duration) -> Result<Option<AnalysisResult>, EngineError> {
        (**self).fetch(timeout)
    }
}

/// Outcome of one classifier step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectState {
    StillListening,
    Detected,
    Timeout,
}

/// A phrase the classifier recognised.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    /// Phrase text as registered in the vocabulary.
    pub text: String,
    /// Vocabulary id, `None` when the phrase was not registered.
    pub command_id: Option<u16>,
    /// Classifier confidence in `0.0..=1.0`.
    pub probability: f32,
}

impl Recognition {
    pub fn new(text: &str, command_id: Option<u16>, probability: f32) -> Self {
        Self {
            text: text.to_string(),
            command_id,
            probability,
        }
    }
}

/// Command phrase classifier, owned by the recognition worker.
pub trait CommandClassifier: Send {
    /// Advance the detector by one analysis chunk.
    fn detect(&mut self, samples: &[i16]) -> DetectState;

    /// Candidates for the last `Detected` step, best first. Empty when the
    /// classifier has nothing to report.
    fn results(&mut self) -> Vec<Recognition>;

    /// Remove every registered phrase.
    fn clear_commands(&mut self) -> Result<(), EngineError>;

    /// Register a phrase under `id`. Takes effect after [`Self::commit_commands`].
    fn add_command(&mut self, id: u16, phrase: &str) -> Result<(), EngineError>;

    /// Apply pending vocabulary changes.
    fn commit_commands(&mut self) -> Result<(), EngineError>;
}

impl<T: CommandClassifier + ?Sized> CommandClassifier for Box<T> {
    fn detect(&mut self, samples: &[i16]) -> DetectState {
        (**self).detect(samples)
    }

    fn results(&mut self) -> Vec<Recognition> {
        (**self).results()
    }

    fn clear_commands(&mut self) -> Result<(), EngineError> {
        (**self).clear_commands()
    }

    fn add_command(&mut self, id: u16, phrase: &str) -> Result<(), EngineError> {
        (**self).add_command(id, phrase)
    }

    fn commit_commands(&mut self) -> Result<(), EngineError> {
        (**self).commit_commands()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_conversion() {
        match VoicectlError::from(EngineError::ClassifierUnavailable("no model".into())) {
            VoicectlError::ClassifierUnavailable { message } => assert_eq!(message, "no model"),
            other => panic!("Expected ClassifierUnavailable, got {:?}", other),
        }
        match VoicectlError::from(EngineError::Fetch("ring empty".into())) {
            VoicectlError::EngineFetch { message } => assert_eq!(message, "ring empty"),
            other => panic!("Expected EngineFetch, got {:?}", other),
        }
        assert!(matches!(
            VoicectlError::from(EngineError::Vocabulary("dup".into())),
            VoicectlError::Vocabulary { .. }
        ));
    }

    #[test]
    fn test_analysis_result_with_wake() {
        let result = AnalysisResult::new(vec![0; 4]).with_wake(1, 2);
        assert_eq!(
            result.wake,
            Some(WakeEvent {
                model_index: 1,
                word_index: 2
            })
        );
        assert_eq!(result.samples.len(), 4);
    }

    #[test]
    fn test_front_end_through_arc() {
        let engine: Arc<dyn FrontEndEngine> = Arc::new(MockFrontEnd::new(8));
        let shared = Arc::clone(&engine);
        assert_eq!(shared.chunk_size(), 8);
    }
}
