//! Default configuration constants for voicectl.
//!
//! Shared by the config file defaults, the pipeline and the host runtime so
//! the values cannot drift apart.

use std::time::Duration;

/// Default audio sample rate in Hz.
///
/// Speech front-ends and command classifiers operate on 16kHz mono.
pub const SAMPLE_RATE: u32 = 16000;

/// Right shift applied when narrowing a 32-bit capture sample to 16 bits.
///
/// I2S MEMS microphones deliver 24 significant bits left-aligned in a 32-bit
/// slot, so the upper 16 bits carry the usable signal.
pub const NARROW_SHIFT: u32 = 16;

/// Default number of samples per feed/fetch cycle.
///
/// The real value is negotiated with the front-end engine at session start;
/// this one is used by the scripted engine and the mocks.
pub const CHUNK_SIZE: usize = 512;

/// Block size of the loopback monitor pipeline (10ms at 16kHz).
pub const LOOPBACK_BLOCK_SIZE: usize = 160;

/// Processing unit the capture worker is pinned to.
pub const CAPTURE_CORE: usize = 0;

/// Processing unit the recognition worker is pinned to.
pub const RECOGNITION_CORE: usize = 1;

/// Stack size of the capture worker in KiB.
pub const CAPTURE_STACK_KIB: usize = 256;

/// Stack size of the recognition worker in KiB.
pub const RECOGNITION_STACK_KIB: usize = 512;

/// How long the classifier listens for a command after a wake event.
pub const COMMAND_TIMEOUT_MS: u32 = 5760;

/// Interval between "still waiting" warnings while `stop()` blocks on a worker.
pub const STOP_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// How long a front-end fetch may block before reporting an empty cycle.
///
/// Keeps the recognition worker responsive to the running flag when the
/// capture side has stopped feeding.
pub const FETCH_TIMEOUT: Duration = Duration::from_millis(100);

/// Chunks the scripted front-end buffers before it starts dropping input.
pub const ENGINE_QUEUE_CHUNKS: usize = 32;

/// Built-in command vocabulary: (id, phrase, action name).
pub const DEFAULT_COMMANDS: &[(u16, &str, &str)] =
    &[(1, "light on", "light_on"), (2, "light off", "light_off")];

/// Samples covered by `ms` milliseconds at `sample_rate`.
pub fn samples_for_ms(ms: u32, sample_rate: u32) -> usize {
    (u64::from(ms) * u64::from(sample_rate) / 1000) as usize
}
