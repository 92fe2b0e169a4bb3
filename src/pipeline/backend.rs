//! Factories for the per-session collaborators.
//!
//! A controller asks its backend for fresh devices and engine instances on
//! every `start`, and drops them again on `stop`.

use crate::audio::device::{AudioSink, AudioSource, MockAudioSink, MockAudioSource};
use crate::engine::mock::{ClassifierProbe, FrontEndProbe};
use crate::engine::{CommandClassifier, FrontEndEngine, MockClassifier, MockFrontEnd};
use crate::error::{Result, VoicectlError};
use crate::pipeline::controller::PipelineConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Creates audio devices sized for a session.
pub trait AudioBackend: Send {
    /// A capture device delivering blocks of `block_size` samples.
    fn audio_source(&mut self, block_size: usize) -> Result<Box<dyn AudioSource>>;

    /// A playback device accepting blocks of `block_size` samples.
    fn audio_sink(&mut self, block_size: usize) -> Result<Box<dyn AudioSink>>;
}

/// Creates everything the voice-command pipeline needs.
pub trait Backend: AudioBackend {
    /// Initialise the front-end. Its `chunk_size` sizes the whole session.
    ///
    /// # Errors
    /// `FrontEndUnavailable` when the engine cannot be brought up.
    fn front_end(&mut self, config: &PipelineConfig) -> Result<Arc<dyn FrontEndEngine>>;

    /// Initialise the command classifier.
    ///
    /// # Errors
    /// `ClassifierUnavailable` when no classifier model can be loaded.
    fn classifier(&mut self, config: &PipelineConfig) -> Result<Box<dyn CommandClassifier>>;
}

/// Backend handing out mocks that all report into shared probes.
///
/// Every session gets fresh clones of the template devices and fresh engine
/// instances, so counters accumulate across `start`/`stop` cycles.
#[derive(Debug, Clone)]
pub struct MockBackend {
    source: MockAudioSource,
    sink: MockAudioSink,
    chunk_size: Arc<AtomicUsize>,
    front_end_probe: FrontEndProbe,
    classifier_probe: ClassifierProbe,
    echo: bool,
    fail_front_end: bool,
    fail_classifier: bool,
    fail_vocabulary: bool,
}

impl MockBackend {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            source: MockAudioSource::new().with_pace(Duration::from_millis(1)),
            sink: MockAudioSink::new(),
            chunk_size: Arc::new(AtomicUsize::new(chunk_size)),
            front_end_probe: FrontEndProbe::new(),
            classifier_probe: ClassifierProbe::new(),
            echo: false,
            fail_front_end: false,
            fail_classifier: false,
            fail_vocabulary: false,
        }
    }

    pub fn with_source(mut self, source: MockAudioSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_sink(mut self, sink: MockAudioSink) -> Self {
        self.sink = sink;
        self
    }

    /// Front-ends turn every fed block into an analysis result.
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn with_front_end_failure(mut self) -> Self {
        self.fail_front_end = true;
        self
    }

    pub fn with_classifier_failure(mut self) -> Self {
        self.fail_classifier = true;
        self
    }

    pub fn with_vocabulary_failure(mut self) -> Self {
        self.fail_vocabulary = true;
        self
    }

    /// Shared chunk size; change it between sessions to resize the next one.
    pub fn chunk_size_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.chunk_size)
    }

    pub fn front_end_probe(&self) -> FrontEndProbe {
        self.front_end_probe.clone()
    }

    pub fn classifier_probe(&self) -> ClassifierProbe {
        self.classifier_probe.clone()
    }

    pub fn source(&self) -> &MockAudioSource {
        &self.source
    }

    pub fn sink(&self) -> &MockAudioSink {
        &self.sink
    }
}

impl AudioBackend for MockBackend {
    fn audio_source(&mut self, _block_size: usize) -> Result<Box<dyn AudioSource>> {
        Ok(Box::new(self.source.clone()))
    }

    fn audio_sink(&mut self, _block_size: usize) -> Result<Box<dyn AudioSink>> {
        Ok(Box::new(self.sink.clone()))
    }
}

impl Backend for MockBackend {
    fn front_end(&mut self, _config: &PipelineConfig) -> Result<Arc<dyn FrontEndEngine>> {
        if self.fail_front_end {
            return Err(VoicectlError::FrontEndUnavailable {
                message: "mock front-end failure".to_string(),
            });
        }
        let chunk_size = self.chunk_size.load(Ordering::SeqCst);
        let mut front_end = MockFrontEnd::with_probe(chunk_size, &self.front_end_probe);
        if self.echo {
            front_end = front_end.with_echo();
        }
        Ok(Arc::new(front_end))
    }

    fn classifier(&mut self, _config: &PipelineConfig) -> Result<Box<dyn CommandClassifier>> {
        if self.fail_classifier {
            return Err(VoicectlError::ClassifierUnavailable {
                message: "mock classifier failure".to_string(),
            });
        }
        let mut classifier = MockClassifier::with_probe(&self.classifier_probe);
        if self.fail_vocabulary {
            classifier = classifier.with_vocabulary_failure();
        }
        Ok(Box::new(classifier))
    }
}
