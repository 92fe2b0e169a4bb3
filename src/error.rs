//! Error types for voicectl.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoicectlError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Session bring-up errors
    #[error("Out of memory: could not allocate {requested_bytes} bytes of scratch buffers")]
    OutOfMemory { requested_bytes: usize },

    #[error("Failed to spawn {worker} worker: {message}")]
    WorkerSpawnFailed {
        worker: &'static str,
        message: String,
    },

    #[error("The {worker} worker panicked")]
    WorkerPanicked { worker: &'static str },

    #[error("Front-end engine unavailable: {message}")]
    FrontEndUnavailable { message: String },

    #[error("Command classifier unavailable: {message}")]
    ClassifierUnavailable { message: String },

    #[error("Command vocabulary rejected: {message}")]
    Vocabulary { message: String },

    // Audio device errors
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Failed to initialise audio device {device}: {message}")]
    DeviceInit { device: String, message: String },

    #[error("Audio device read failed: {message}")]
    DeviceRead { message: String },

    #[error("Audio device write failed: {message}")]
    DeviceWrite { message: String },

    // Engine runtime errors
    #[error("Front-end fetch failed: {message}")]
    EngineFetch { message: String },

    // Actuator errors
    #[error("Actuator {actuator} failed: {message}")]
    Actuator {
        actuator: &'static str,
        message: String,
    },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VoicectlError>;
