//! Session resources: scratch buffers, allocation accounting and statistics.

use crate::error::{Result, VoicectlError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counts scratch buffer allocations so leaks and double allocations show up.
#[derive(Debug, Default)]
pub struct AllocationStats {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl AllocationStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer sets allocated since creation.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    /// Buffer sets released since creation.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffer sets currently alive.
    pub fn live(&self) -> usize {
        self.allocated().saturating_sub(self.released())
    }
}

/// The capture worker's two scratch blocks, allocated and released together.
#[derive(Debug)]
pub struct ScratchBuffers {
    /// Raw 32-bit capture block.
    pub wide: Vec<i32>,
    /// Narrowed 16-bit block.
    pub narrow: Vec<i16>,
    stats: Arc<AllocationStats>,
}

impl ScratchBuffers {
    /// Bytes needed for `chunk_size` samples in both widths.
    pub fn bytes_for(chunk_size: usize) -> usize {
        chunk_size.saturating_mul(std::mem::size_of::<i32>() + std::mem::size_of::<i16>())
    }

    /// Allocate both blocks for `chunk_size` samples.
    ///
    /// # Errors
    /// `OutOfMemory` if either allocation fails or the total exceeds `budget`.
    /// A block allocated before the failure is freed before returning.
    pub fn allocate(
        chunk_size: usize,
        budget: Option<usize>,
        stats: &Arc<AllocationStats>,
    ) -> Result<Self> {
        let requested_bytes = Self::bytes_for(chunk_size);
        if budget.is_some_and(|limit| requested_bytes > limit) {
            return Err(VoicectlError::OutOfMemory { requested_bytes });
        }

        let oom = |_| VoicectlError::OutOfMemory { requested_bytes };
        let mut wide: Vec<i32> = Vec::new();
        wide.try_reserve_exact(chunk_size).map_err(oom)?;
        wide.resize(chunk_size, 0);

        let mut narrow: Vec<i16> = Vec::new();
        narrow.try_reserve_exact(chunk_size).map_err(oom)?;
        narrow.resize(chunk_size, 0);

        stats.allocated.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Allocated scratch buffers: {} samples, {} bytes",
            chunk_size,
            requested_bytes
        );
        Ok(Self {
            wide,
            narrow,
            stats: Arc::clone(stats),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.wide.len()
    }
}

impl Drop for ScratchBuffers {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Live counters shared by the workers of one controller.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub(crate) blocks_captured: AtomicU64,
    pub(crate) short_reads: AtomicU64,
    pub(crate) read_errors: AtomicU64,
    pub(crate) monitor_dropped: AtomicU64,
    pub(crate) feed_errors: AtomicU64,
    pub(crate) fetch_errors: AtomicU64,
    pub(crate) results: AtomicU64,
    pub(crate) wake_events: AtomicU64,
    pub(crate) commands_dispatched: AtomicU64,
    pub(crate) command_timeouts: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            blocks_captured: get(&self.blocks_captured),
            short_reads: get(&self.short_reads),
            read_errors: get(&self.read_errors),
            monitor_dropped: get(&self.monitor_dropped),
            feed_errors: get(&self.feed_errors),
            fetch_errors: get(&self.fetch_errors),
            results: get(&self.results),
            wake_events: get(&self.wake_events),
            commands_dispatched: get(&self.commands_dispatched),
            command_timeouts: get(&self.command_timeouts),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Full blocks read and fed.
    pub blocks_captured: u64,
    pub short_reads: u64,
    pub read_errors: u64,
    /// Blocks the monitor sink did not accept.
    pub monitor_dropped: u64,
    pub feed_errors: u64,
    pub fetch_errors: u64,
    /// Analysis results processed by the recognition worker.
    pub results: u64,
    pub wake_events: u64,
    pub commands_dispatched: u64,
    pub command_timeouts: u64,
}
