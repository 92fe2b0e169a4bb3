//! Voice-command pipeline.
//!
//! Two workers run per session, connected through the front-end engine:
//!
//! ```text
//! capture:      source → narrow → monitor sink
//!                               → front-end.feed
//! recognition:  front-end.fetch → wake? → classifier → dispatcher
//! ```
//!
//! The [`PipelineController`] owns the session lifecycle. Each worker owns
//! its state while it runs and hands it back when joined.

pub mod backend;
pub mod capture;
pub mod controller;
pub mod error;
pub mod loopback;
pub mod recognition;
pub mod session;
pub mod worker;

pub use backend::{AudioBackend, Backend, MockBackend};
pub use controller::{PipelineConfig, PipelineController, StartOutcome};
pub use error::{CycleError, ErrorReporter, LogReporter};
pub use loopback::{LoopbackConfig, LoopbackPipeline};
pub use recognition::{DetectionState, Recognizer, Step};
pub use session::{AllocationStats, ScratchBuffers, StatsSnapshot};
pub use worker::{SpawnFailure, WorkerHandle, WorkerSpec};
