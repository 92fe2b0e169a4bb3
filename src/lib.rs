//! voicectl - wake phrase and voice command pipeline
//!
//! Captures audio on one pinned worker, recognises wake phrases and commands
//! on another, and dispatches recognised commands to actuators.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod actuator;
pub mod audio;
pub mod command;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod sys;

#[cfg(feature = "cli")]
pub mod cli;

// Composition root
#[cfg(feature = "cli")]
pub mod app;

// Capabilities (source → engine → dispatch)
pub use audio::device::{AudioSink, AudioSource, Timeout};
pub use command::{Command, CommandDispatcher, Vocabulary};
pub use engine::{CommandClassifier, FrontEndEngine};

// Pipeline
pub use pipeline::{
    Backend, LoopbackPipeline, PipelineConfig, PipelineController, StartOutcome,
};

// Error handling
pub use error::{Result, VoicectlError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.0.1+abc1234"` when git hash is available, `"0.0.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
