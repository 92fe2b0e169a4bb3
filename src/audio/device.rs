//! Audio device capabilities used by the pipeline.
//!
//! The pipeline never talks to hardware directly. It reads 32-bit capture
//! blocks from an [`AudioSource`] and writes 16-bit blocks to an [`AudioSink`].

use crate::error::{Result, VoicectlError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How long a device call may suspend the calling worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Return immediately with whatever can be transferred.
    Immediate,
    /// Block until the transfer is complete or the device fails.
    Forever,
    /// Block for at most the given duration.
    After(Duration),
}

/// Trait for audio capture devices.
///
/// This trait allows swapping implementations (real microphone, WAV replay, mock).
pub trait AudioSource: Send {
    /// Enable the device. Called once per session before the capture worker starts.
    fn start(&mut self) -> Result<()>;

    /// Disable the device. Called after the capture worker has exited.
    fn stop(&mut self) -> Result<()>;

    /// Read one block of signed 32-bit mono samples.
    ///
    /// # Returns
    /// Number of samples written into `block`. Fewer than `block.len()` means
    /// a short read; the caller discards the block.
    fn read(&mut self, block: &mut [i32], timeout: Timeout) -> Result<usize>;
}

/// Trait for audio playback devices.
pub trait AudioSink: Send {
    /// Enable the device.
    fn start(&mut self) -> Result<()>;

    /// Disable the device, flushing anything it buffered.
    fn stop(&mut self) -> Result<()>;

    /// Write one block of signed 16-bit mono samples.
    ///
    /// # Returns
    /// Number of samples accepted. With [`Timeout::Immediate`] a full device
    /// accepts zero samples instead of blocking.
    fn write(&mut self, block: &[i16], timeout: Timeout) -> Result<usize>;
}

/// Sink that accepts and discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, block: &[i16], _timeout: Timeout) -> Result<usize> {
        Ok(block.len())
    }
}

/// Mock audio source for testing.
///
/// Counters are shared handles so tests can observe the source after it has
/// been moved into a worker thread.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    block: Vec<i32>,
    short_reads: usize,
    always_short: bool,
    should_fail_start: bool,
    should_fail_read: bool,
    pace: Option<Duration>,
    error_message: String,
    started: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
}

impl MockAudioSource {
    /// Create a mock source that delivers silent full blocks.
    pub fn new() -> Self {
        Self {
            block: Vec::new(),
            short_reads: 0,
            always_short: false,
            should_fail_start: false,
            should_fail_read: false,
            pace: None,
            error_message: "mock audio error".to_string(),
            started: Arc::new(AtomicBool::new(false)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Samples copied into every block (repeated or truncated to fit).
    pub fn with_samples(mut self, samples: Vec<i32>) -> Self {
        self.block = samples;
        self
    }

    /// The first `count` reads return half a block.
    pub fn with_short_reads(mut self, count: usize) -> Self {
        self.short_reads = count;
        self
    }

    /// Every read returns half a block.
    pub fn with_only_short_reads(mut self) -> Self {
        self.always_short = true;
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on every read.
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Sleep this long inside every read, like a device waiting for DMA.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Configure the error message for failures.
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Shared flag tracking whether the device is enabled.
    pub fn started_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }

    /// Shared counter of `read` calls.
    pub fn reads_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(VoicectlError::DeviceInit {
                device: "mock microphone".to_string(),
                message: self.error_message.clone(),
            });
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read(&mut self, block: &mut [i32], _timeout: Timeout) -> Result<usize> {
        let count = self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        if self.should_fail_read {
            return Err(VoicectlError::DeviceRead {
                message: self.error_message.clone(),
            });
        }

        let len = if self.always_short || count < self.short_reads {
            block.len() / 2
        } else {
            block.len()
        };
        for (i, slot) in block[..len].iter_mut().enumerate() {
            *slot = if self.block.is_empty() {
                0
            } else {
                self.block[i % self.block.len()]
            };
        }
        Ok(len)
    }
}

/// Mock audio sink that records every accepted block.
#[derive(Debug, Clone, Default)]
pub struct MockAudioSink {
    full: bool,
    started: Arc<AtomicBool>,
    blocks: Arc<Mutex<Vec<Vec<i16>>>>,
    attempts: Arc<AtomicUsize>,
}

impl MockAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like a device whose queue is full: accept nothing without blocking.
    pub fn with_backpressure(mut self) -> Self {
        self.full = true;
        self
    }

    /// Shared list of accepted blocks.
    pub fn blocks_handle(&self) -> Arc<Mutex<Vec<Vec<i16>>>> {
        Arc::clone(&self.blocks)
    }

    /// Shared counter of `write` calls, accepted or not.
    pub fn attempts_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }

    /// Shared flag tracking whether the device is enabled.
    pub fn started_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }
}

impl AudioSink for MockAudioSink {
    fn start(&mut self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, block: &[i16], _timeout: Timeout) -> Result<usize> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.full {
            return Ok(0);
        }
        self.blocks
            .lock()
            .map_err(|e| VoicectlError::DeviceWrite {
                message: format!("Failed to lock mock sink: {}", e),
            })?
            .push(block.to_vec());
        Ok(block.len())
    }
}
