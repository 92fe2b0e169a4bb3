//! Voice-command pipeline lifecycle.
//!
//! `start` brings up one session: front-end, scratch buffers, devices,
//! classifier and vocabulary, then the capture and recognition workers.
//! `stop` clears the running flag, waits for both workers to exit and only
//! then releases what the session owned.

use crate::actuator::{LogAcknowledger, WakeAcknowledger};
use crate::audio::device::{AudioSink, AudioSource};
use crate::command::{CommandDispatcher, Vocabulary};
use crate::defaults;
use crate::engine::FrontEndEngine;
use crate::error::{Result, VoicectlError};
use crate::pipeline::backend::Backend;
use crate::pipeline::capture::{self, CaptureWorker};
use crate::pipeline::error::{ErrorReporter, LogReporter};
use crate::pipeline::recognition::{self, RecognitionWorker, Recognizer};
use crate::pipeline::session::{AllocationStats, PipelineStats, ScratchBuffers, StatsSnapshot};
use crate::pipeline::worker::{WorkerHandle, WorkerSpec};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Result of a successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new session is running.
    Started,
    /// A session was already running; nothing changed.
    AlreadyRunning,
}

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    /// Capture worker scheduling.
    pub capture: WorkerSpec,
    /// Recognition worker scheduling.
    pub recognition: WorkerSpec,
    /// Cap on scratch buffer bytes; exceeding it fails `start` with `OutOfMemory`.
    pub scratch_budget_bytes: Option<usize>,
    /// Echo narrowed audio to the sink.
    pub monitor: bool,
    /// How long the classifier listens after a wake event.
    pub command_timeout_ms: u32,
    /// How often `stop` warns while a worker has not exited.
    pub stop_warn_interval: Duration,
    pub vocabulary: Vocabulary,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            capture: WorkerSpec {
                name: capture::WORKER_NAME,
                core: Some(defaults::CAPTURE_CORE),
                stack_kib: defaults::CAPTURE_STACK_KIB,
            },
            recognition: WorkerSpec {
                name: recognition::WORKER_NAME,
                core: Some(defaults::RECOGNITION_CORE),
                stack_kib: defaults::RECOGNITION_STACK_KIB,
            },
            scratch_budget_bytes: None,
            monitor: true,
            command_timeout_ms: defaults::COMMAND_TIMEOUT_MS,
            stop_warn_interval: defaults::STOP_WARN_INTERVAL,
            vocabulary: Vocabulary::default(),
        }
    }
}

impl PipelineConfig {
    /// Leave both workers to the scheduler.
    pub fn unpinned(mut self) -> Self {
        self.capture.core = None;
        self.recognition.core = None;
        self
    }
}

/// Everything one running session owns.
struct PipelineSession {
    running: Arc<AtomicBool>,
    capture: WorkerHandle<CaptureWorker>,
    recognition: WorkerHandle<RecognitionWorker>,
}

impl PipelineSession {
    /// Signal both workers, wait for both, then release devices, buffers and engines.
    fn shutdown(mut self, warn_every: Duration) {
        self.running.store(false, Ordering::SeqCst);

        self.capture.wait(warn_every);
        self.recognition.wait(warn_every);

        let capture = self.capture.join(warn_every);
        let recognition = self.recognition.join(warn_every);

        match capture {
            Ok(mut state) => stop_devices(state.source.as_mut(), state.sink.as_mut()),
            Err(e) => log::error!("{}", e),
        }
        if let Err(e) = recognition {
            log::error!("{}", e);
        }
        // Worker states, and with them the buffers, classifier and front-end,
        // drop here, after both threads are gone.
    }
}

fn stop_devices(source: &mut dyn AudioSource, sink: &mut dyn AudioSink) {
    if let Err(e) = source.stop() {
        log::warn!("Failed to stop audio source: {}", e);
    }
    if let Err(e) = sink.stop() {
        log::warn!("Failed to stop audio sink: {}", e);
    }
}

/// Owns the pipeline lifecycle. At most one session exists at a time.
pub struct PipelineController {
    config: PipelineConfig,
    backend: Box<dyn Backend>,
    dispatcher: Arc<dyn CommandDispatcher>,
    acknowledger: Arc<dyn WakeAcknowledger>,
    reporter: Arc<dyn ErrorReporter>,
    allocations: Arc<AllocationStats>,
    stats: Arc<PipelineStats>,
    session: Option<PipelineSession>,
    sessions_started: u64,
}

impl PipelineController {
    pub fn new(
        config: PipelineConfig,
        backend: Box<dyn Backend>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        Self {
            config,
            backend,
            dispatcher,
            acknowledger: Arc::new(LogAcknowledger),
            reporter: Arc::new(LogReporter),
            allocations: Arc::new(AllocationStats::new()),
            stats: Arc::new(PipelineStats::new()),
            session: None,
            sessions_started: 0,
        }
    }

    /// Sets the wake feedback.
    pub fn with_acknowledger(mut self, acknowledger: Arc<dyn WakeAcknowledger>) -> Self {
        self.acknowledger = acknowledger;
        self
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Whether a session is active.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Sessions successfully started since creation.
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }

    /// Scratch buffer accounting across all sessions.
    pub fn allocations(&self) -> &AllocationStats {
        &self.allocations
    }

    /// Counters of the current (or most recent) session.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Start a session.
    ///
    /// Idempotent: with a session already running this returns
    /// `Ok(StartOutcome::AlreadyRunning)` and changes nothing.
    ///
    /// # Errors
    /// `FrontEndUnavailable`, `OutOfMemory`, device errors,
    /// `ClassifierUnavailable`, `Vocabulary` or `WorkerSpawnFailed`. On any
    /// error everything acquired so far has been released again.
    pub fn start(&mut self) -> Result<StartOutcome> {
        if self.session.is_some() {
            log::debug!("Pipeline already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let front_end = self.backend.front_end(&self.config)?;
        let chunk_size = front_end.chunk_size();
        if chunk_size == 0 {
            return Err(VoicectlError::FrontEndUnavailable {
                message: "engine reported a chunk size of 0".to_string(),
            });
        }

        let buffers =
            ScratchBuffers::allocate(chunk_size, self.config.scratch_budget_bytes, &self.allocations)?;

        let mut source = self.backend.audio_source(chunk_size)?;
        let mut sink = self.backend.audio_sink(chunk_size)?;

        let mut classifier = self.backend.classifier(&self.config)?;
        self.config.vocabulary.install(classifier.as_mut())?;

        source.start()?;
        if let Err(e) = sink.start() {
            if let Err(stop_err) = source.stop() {
                log::warn!("Failed to stop audio source: {}", stop_err);
            }
            return Err(e);
        }

        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(PipelineStats::new());

        let capture_state = CaptureWorker::new(
            source,
            sink,
            buffers,
            Arc::clone(&front_end),
            self.config.monitor,
            Arc::clone(&running),
            Arc::clone(&stats),
            Arc::clone(&self.reporter),
        );
        let capture = match WorkerHandle::spawn(&self.config.capture, capture_state, CaptureWorker::run)
        {
            Ok(handle) => handle,
            Err(failure) => {
                running.store(false, Ordering::SeqCst);
                let mut state = failure.state;
                stop_devices(state.source.as_mut(), state.sink.as_mut());
                return Err(failure.error);
            }
        };

        let recognition_state = RecognitionWorker::new(
            front_end,
            Recognizer::new(
                classifier,
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.acknowledger),
            ),
            Arc::clone(&running),
            Arc::clone(&stats),
            Arc::clone(&self.reporter),
        );
        let recognition = match WorkerHandle::spawn(
            &self.config.recognition,
            recognition_state,
            RecognitionWorker::run,
        ) {
            Ok(handle) => handle,
            Err(failure) => {
                running.store(false, Ordering::SeqCst);
                match capture.join(self.config.stop_warn_interval) {
                    Ok(mut state) => stop_devices(state.source.as_mut(), state.sink.as_mut()),
                    Err(e) => log::error!("{}", e),
                }
                return Err(failure.error);
            }
        };

        self.stats = stats;
        self.session = Some(PipelineSession {
            running,
            capture,
            recognition,
        });
        self.sessions_started += 1;
        log::info!(
            "Pipeline started: chunk {} samples, {} commands",
            chunk_size,
            self.config.vocabulary.len()
        );
        Ok(StartOutcome::Started)
    }

    /// Stop the session, if any.
    ///
    /// Blocks until both workers have exited. A worker stuck in a device read
    /// keeps this waiting, with a warning every `stop_warn_interval`.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.shutdown(self.config.stop_warn_interval);
        log::info!("Pipeline stopped");
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::MockAudioSource;
    use crate::command::CollectingDispatcher;
    use crate::pipeline::backend::MockBackend;
    use crate::sys;

    fn controller(backend: MockBackend) -> PipelineController {
        PipelineController::new(
            PipelineConfig::default().unpinned(),
            Box::new(backend),
            Arc::new(CollectingDispatcher::new()),
        )
    }

    #[test]
    fn test_start_stop_releases_everything() {
        let backend = MockBackend::new(64);
        let front_ends = backend.front_end_probe();
        let classifiers = backend.classifier_probe();
        let source_started = backend.source().started_handle();
        let mut controller = controller(backend);

        assert_eq!(controller.start().unwrap(), StartOutcome::Started);
        assert!(controller.is_running());
        assert!(source_started.load(Ordering::SeqCst));
        assert_eq!(front_ends.live(), 1);
        assert_eq!(classifiers.live(), 1);
        assert_eq!(controller.allocations().live(), 1);

        controller.stop();

        assert!(!controller.is_running());
        assert!(!source_started.load(Ordering::SeqCst));
        assert_eq!(front_ends.live(), 0);
        assert_eq!(classifiers.live(), 0);
        assert_eq!(controller.allocations().live(), 0);
    }

    #[test]
    fn test_vocabulary_installed_on_start() {
        let backend = MockBackend::new(64);
        let classifiers = backend.classifier_probe();
        let mut controller = controller(backend);

        controller.start().unwrap();

        assert_eq!(
            classifiers.vocabulary(),
            vec![(1, "light on".to_string()), (2, "light off".to_string())]
        );
    }

    #[test]
    fn test_stop_without_session_is_noop() {
        let mut controller = controller(MockBackend::new(64));
        controller.stop();
        controller.stop();
        assert!(!controller.is_running());
    }

    #[test]
    fn test_front_end_failure_leaves_nothing() {
        let mut controller = controller(MockBackend::new(64).with_front_end_failure());

        assert!(matches!(
            controller.start(),
            Err(VoicectlError::FrontEndUnavailable { .. })
        ));
        assert_eq!(controller.allocations().allocated(), 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let backend = MockBackend::new(0);
        let front_ends = backend.front_end_probe();
        let mut controller = controller(backend);

        assert!(matches!(
            controller.start(),
            Err(VoicectlError::FrontEndUnavailable { .. })
        ));
        assert_eq!(front_ends.live(), 0);
    }

    #[test]
    fn test_classifier_failure_rolls_back() {
        let backend = MockBackend::new(64).with_classifier_failure();
        let front_ends = backend.front_end_probe();
        let source_started = backend.source().started_handle();
        let mut controller = controller(backend);

        assert!(matches!(
            controller.start(),
            Err(VoicectlError::ClassifierUnavailable { .. })
        ));
        assert_eq!(front_ends.live(), 0);
        assert_eq!(controller.allocations().live(), 0);
        assert!(!source_started.load(Ordering::SeqCst));
    }

    #[test]
    fn test_vocabulary_failure_rolls_back() {
        let backend = MockBackend::new(64).with_vocabulary_failure();
        let classifiers = backend.classifier_probe();
        let mut controller = controller(backend);

        assert!(matches!(
            controller.start(),
            Err(VoicectlError::Vocabulary { .. })
        ));
        assert_eq!(classifiers.live(), 0);
        assert_eq!(controller.allocations().live(), 0);
    }

    #[test]
    fn test_source_start_failure_rolls_back() {
        let backend = MockBackend::new(64).with_source(MockAudioSource::new().with_start_failure());
        let front_ends = backend.front_end_probe();
        let mut controller = controller(backend);

        assert!(matches!(
            controller.start(),
            Err(VoicectlError::DeviceInit { .. })
        ));
        assert_eq!(front_ends.live(), 0);
        assert_eq!(controller.allocations().live(), 0);
    }

    #[test]
    fn test_capture_pin_failure_rolls_back() {
        let backend = MockBackend::new(64);
        let front_ends = backend.front_end_probe();
        let source_started = backend.source().started_handle();
        let mut config = PipelineConfig::default().unpinned();
        config.capture.core = Some(sys::available_cores() + 100);
        let mut controller = PipelineController::new(
            config,
            Box::new(backend),
            Arc::new(CollectingDispatcher::new()),
        );

        match controller.start() {
            Err(VoicectlError::WorkerSpawnFailed { worker, .. }) => assert_eq!(worker, "capture"),
            other => panic!("Expected WorkerSpawnFailed, got {:?}", other),
        }
        assert!(!controller.is_running());
        assert!(!source_started.load(Ordering::SeqCst));
        assert_eq!(front_ends.live(), 0);
        assert_eq!(controller.allocations().live(), 0);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_capture_thread_creation_failure_stops_devices() {
        let backend = MockBackend::new(64);
        let source_started = backend.source().started_handle();
        let sink_started = backend.sink().started_handle();
        let mut config = PipelineConfig::default().unpinned();
        config.capture.stack_kib = 1 << 38;
        let mut controller = PipelineController::new(
            config,
            Box::new(backend),
            Arc::new(CollectingDispatcher::new()),
        );

        match controller.start() {
            Err(VoicectlError::WorkerSpawnFailed { worker, .. }) => assert_eq!(worker, "capture"),
            other => panic!("Expected WorkerSpawnFailed, got {:?}", other),
        }
        assert!(!source_started.load(Ordering::SeqCst));
        assert!(!sink_started.load(Ordering::SeqCst));
        assert_eq!(controller.allocations().live(), 0);
    }

    #[test]
    fn test_new_session_gets_fresh_stats() {
        let backend = MockBackend::new(16).with_echo();
        let mut controller = controller(backend);

        controller.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        controller.stop();
        let first = controller.stats();
        assert!(first.blocks_captured > 0);
        assert_eq!(controller.stats(), first);

        controller.start().unwrap();
        controller.stop();
        assert_eq!(controller.sessions_started(), 2);
    }
}
