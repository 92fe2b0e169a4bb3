//! Microphone-to-speaker loopback.
//!
//! A single pinned worker reads fixed 10 ms blocks, narrows them and writes
//! them to the sink, blocking until the sink accepts each block. Useful for
//! checking the audio path without any engine in the loop.

use crate::audio::convert::narrow_block;
use crate::audio::device::{AudioSink, AudioSource, Timeout};
use crate::defaults;
use crate::error::Result;
use crate::pipeline::backend::AudioBackend;
use crate::pipeline::error::{CycleError, ErrorReporter, LogReporter};
use crate::pipeline::session::{AllocationStats, ScratchBuffers};
use crate::pipeline::worker::{WorkerHandle, WorkerSpec};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

const WORKER_NAME: &str = "loopback";

/// Configuration for [`LoopbackPipeline`].
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub block_size: usize,
    pub worker: WorkerSpec,
    pub scratch_budget_bytes: Option<usize>,
    pub stop_warn_interval: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            block_size: defaults::LOOPBACK_BLOCK_SIZE,
            worker: WorkerSpec {
                name: WORKER_NAME,
                core: Some(defaults::CAPTURE_CORE),
                stack_kib: defaults::CAPTURE_STACK_KIB,
            },
            scratch_budget_bytes: None,
            stop_warn_interval: defaults::STOP_WARN_INTERVAL,
        }
    }
}

struct LoopbackWorker {
    source: Box<dyn AudioSource>,
    sink: Box<dyn AudioSink>,
    buffers: ScratchBuffers,
    running: Arc<AtomicBool>,
    forwarded: Arc<AtomicU64>,
    reporter: Arc<dyn ErrorReporter>,
}

impl LoopbackWorker {
    fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(error) = self.cycle() {
                self.reporter.report(WORKER_NAME, &error);
            }
        }
    }

    fn cycle(&mut self) -> std::result::Result<(), CycleError> {
        let expected = self.buffers.wide.len();
        let got = self
            .source
            .read(&mut self.buffers.wide, Timeout::Forever)
            .map_err(|e| CycleError::Device(e.to_string()))?;
        if got != expected {
            return Err(CycleError::ShortRead { expected, got });
        }

        narrow_block(&self.buffers.wide, &mut self.buffers.narrow);
        self.sink
            .write(&self.buffers.narrow, Timeout::Forever)
            .map_err(|e| CycleError::Device(e.to_string()))?;
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

struct LoopbackSession {
    running: Arc<AtomicBool>,
    worker: WorkerHandle<LoopbackWorker>,
}

/// Loopback lifecycle with the same start/stop contract as the controller.
pub struct LoopbackPipeline {
    config: LoopbackConfig,
    backend: Box<dyn AudioBackend>,
    reporter: Arc<dyn ErrorReporter>,
    allocations: Arc<AllocationStats>,
    forwarded: Arc<AtomicU64>,
    session: Option<LoopbackSession>,
}

impl LoopbackPipeline {
    pub fn new(config: LoopbackConfig, backend: Box<dyn AudioBackend>) -> Self {
        Self {
            config,
            backend,
            reporter: Arc::new(LogReporter),
            allocations: Arc::new(AllocationStats::new()),
            forwarded: Arc::new(AtomicU64::new(0)),
            session: None,
        }
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn allocations(&self) -> &AllocationStats {
        &self.allocations
    }

    /// Blocks forwarded to the sink since creation.
    pub fn blocks_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Start forwarding. Returns `Ok(false)` if already running.
    ///
    /// # Errors
    /// `OutOfMemory`, device errors or `WorkerSpawnFailed`; nothing stays
    /// allocated or enabled afterwards.
    pub fn start(&mut self) -> Result<bool> {
        if self.session.is_some() {
            return Ok(false);
        }

        let block_size = self.config.block_size;
        let buffers =
            ScratchBuffers::allocate(block_size, self.config.scratch_budget_bytes, &self.allocations)?;
        let mut source = self.backend.audio_source(block_size)?;
        let mut sink = self.backend.audio_sink(block_size)?;

        source.start()?;
        if let Err(e) = sink.start() {
            if let Err(stop_err) = source.stop() {
                log::warn!("Failed to stop audio source: {}", stop_err);
            }
            return Err(e);
        }

        let running = Arc::new(AtomicBool::new(true));
        let state = LoopbackWorker {
            source,
            sink,
            buffers,
            running: Arc::clone(&running),
            forwarded: Arc::clone(&self.forwarded),
            reporter: Arc::clone(&self.reporter),
        };

        match WorkerHandle::spawn(&self.config.worker, state, LoopbackWorker::run) {
            Ok(worker) => {
                self.session = Some(LoopbackSession { running, worker });
                log::info!("Loopback started: {} samples per block", block_size);
                Ok(true)
            }
            Err(failure) => {
                let mut state = failure.state;
                stop_devices(&mut state);
                Err(failure.error)
            }
        }
    }

    /// Stop forwarding and release the devices. No-op when stopped.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.running.store(false, Ordering::SeqCst);
        match session.worker.join(self.config.stop_warn_interval) {
            Ok(mut state) => stop_devices(&mut state),
            Err(e) => log::error!("{}", e),
        }
        log::info!("Loopback stopped");
    }
}

fn stop_devices(state: &mut LoopbackWorker) {
    if let Err(e) = state.source.stop() {
        log::warn!("Failed to stop audio source: {}", e);
    }
    if let Err(e) = state.sink.stop() {
        log::warn!("Failed to stop audio sink: {}", e);
    }
}

impl Drop for LoopbackPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
