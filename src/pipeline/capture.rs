//! Capture worker: microphone → narrow → {monitor sink, front-end}.

use crate::audio::convert::narrow_block;
use crate::audio::device::{AudioSink, AudioSource, Timeout};
use crate::engine::FrontEndEngine;
use crate::pipeline::error::{CycleError, ErrorReporter};
use crate::pipeline::session::{PipelineStats, ScratchBuffers};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Pause after a device error so a dead device does not spin the core.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(10);

pub(crate) const WORKER_NAME: &str = "capture";

/// State owned by the capture worker for the lifetime of a session.
pub struct CaptureWorker {
    pub(crate) source: Box<dyn AudioSource>,
    pub(crate) sink: Box<dyn AudioSink>,
    pub(crate) buffers: ScratchBuffers,
    front_end: Arc<dyn FrontEndEngine>,
    monitor: bool,
    running: Arc<AtomicBool>,
    stats: Arc<PipelineStats>,
    reporter: Arc<dyn ErrorReporter>,
}

impl CaptureWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
        buffers: ScratchBuffers,
        front_end: Arc<dyn FrontEndEngine>,
        monitor: bool,
        running: Arc<AtomicBool>,
        stats: Arc<PipelineStats>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            source,
            sink,
            buffers,
            front_end,
            monitor,
            running,
            stats,
            reporter,
        }
    }

    /// Loop until the running flag clears.
    pub(crate) fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            if let Err(error) = self.cycle() {
                self.reporter.report(WORKER_NAME, &error);
                if !error.is_routine() {
                    std::thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
    }

    /// One block: read, narrow, echo, feed.
    pub(crate) fn cycle(&mut self) -> Result<(), CycleError> {
        let expected = self.buffers.wide.len();
        let got = match self.source.read(&mut self.buffers.wide, Timeout::Forever) {
            Ok(n) => n,
            Err(e) => {
                PipelineStats::bump(&self.stats.read_errors);
                return Err(CycleError::Device(e.to_string()));
            }
        };
        if got != expected {
            PipelineStats::bump(&self.stats.short_reads);
            return Err(CycleError::ShortRead { expected, got });
        }

        narrow_block(&self.buffers.wide, &mut self.buffers.narrow);

        if self.monitor {
            // Best effort: a full or failing sink never holds up capture.
            match self.sink.write(&self.buffers.narrow, Timeout::Immediate) {
                Ok(n) if n == expected => {}
                Ok(_) | Err(_) => PipelineStats::bump(&self.stats.monitor_dropped),
            }
        }

        if let Err(e) = self.front_end.feed(&self.buffers.narrow) {
            PipelineStats::bump(&self.stats.feed_errors);
            return Err(CycleError::Engine(e.to_string()));
        }
        PipelineStats::bump(&self.stats.blocks_captured);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::device::{MockAudioSink, MockAudioSource};
    use crate::engine::MockFrontEnd;
    use crate::pipeline::error::LogReporter;
    use crate::pipeline::session::AllocationStats;

    fn worker(source: MockAudioSource, sink: MockAudioSink, front_end: MockFrontEnd) -> CaptureWorker {
        let chunk = front_end.chunk_size();
        let buffers =
            ScratchBuffers::allocate(chunk, None, &Arc::new(AllocationStats::new())).unwrap();
        CaptureWorker::new(
            Box::new(source),
            Box::new(sink),
            buffers,
            Arc::new(front_end),
            true,
            Arc::new(AtomicBool::new(true)),
            Arc::new(PipelineStats::new()),
            Arc::new(LogReporter),
        )
    }

    #[test]
    fn test_cycle_narrows_and_feeds() {
        let source = MockAudioSource::new().with_samples(vec![i32::MIN, 0x0001_0000, -0x0001_0001]);
        let sink = MockAudioSink::new();
        let blocks = sink.blocks_handle();
        let front_end = MockFrontEnd::new(6);
        let probe = front_end.probe();
        let mut worker = worker(source, sink, front_end);

        worker.cycle().unwrap();

        let expected = vec![i16::MIN, 1, -2, i16::MIN, 1, -2];
        assert_eq!(probe.last_fed(), expected);
        assert_eq!(blocks.lock().unwrap()[0], expected);
        assert_eq!(worker.stats.snapshot().blocks_captured, 1);
    }

    #[test]
    fn test_short_reads_never_reach_front_end() {
        let front_end = MockFrontEnd::new(8);
        let probe = front_end.probe();
        let sink = MockAudioSink::new();
        let attempts = sink.attempts_handle();
        let mut worker = worker(MockAudioSource::new().with_only_short_reads(), sink, front_end);

        for _ in 0..10 {
            assert_eq!(
                worker.cycle(),
                Err(CycleError::ShortRead {
                    expected: 8,
                    got: 4
                })
            );
        }

        assert_eq!(probe.feeds(), 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert_eq!(worker.stats.snapshot().short_reads, 10);
    }

    #[test]
    fn test_full_sink_does_not_block_feed() {
        let front_end = MockFrontEnd::new(4);
        let probe = front_end.probe();
        let mut worker = worker(
            MockAudioSource::new(),
            MockAudioSink::new().with_backpressure(),
            front_end,
        );

        worker.cycle().unwrap();
        worker.cycle().unwrap();

        assert_eq!(probe.feeds(), 2);
        assert_eq!(worker.stats.snapshot().monitor_dropped, 2);
    }

    #[test]
    fn test_read_error_is_absorbed() {
        let front_end = MockFrontEnd::new(4);
        let probe = front_end.probe();
        let mut worker = worker(
            MockAudioSource::new().with_read_failure(),
            MockAudioSink::new(),
            front_end,
        );

        assert!(matches!(worker.cycle(), Err(CycleError::Device(_))));
        assert_eq!(probe.feeds(), 0);
        assert_eq!(worker.stats.snapshot().read_errors, 1);
    }

    #[test]
    fn test_feed_error_is_reported() {
        let mut worker = worker(
            MockAudioSource::new(),
            MockAudioSink::new(),
            MockFrontEnd::new(4).with_feed_failure(),
        );

        assert!(matches!(worker.cycle(), Err(CycleError::Engine(_))));
        assert_eq!(worker.stats.snapshot().feed_errors, 1);
        assert_eq!(worker.stats.snapshot().blocks_captured, 0);
    }

    #[test]
    fn test_run_exits_when_flag_cleared() {
        let mut worker = worker(
            MockAudioSource::new().with_short_reads(3),
            MockAudioSink::new(),
            MockFrontEnd::new(4),
        );
        worker.running.store(false, Ordering::SeqCst);

        worker.run();

        assert_eq!(worker.stats.snapshot().blocks_captured, 0);
    }
}
