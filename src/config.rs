use crate::command::{Vocabulary, VocabularyEntry};
use crate::defaults;
use crate::error::{Result, VoicectlError};
use crate::pipeline::capture;
use crate::pipeline::recognition;
use crate::pipeline::{PipelineConfig, WorkerSpec};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub pipeline: WorkersConfig,
    pub engine: EngineConfig,
    pub commands: Vec<VocabularyEntry>,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    /// Echo narrowed capture audio to the output device.
    pub monitor: bool,
}

/// Worker scheduling and resource limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkersConfig {
    /// Pin the workers to `capture_core` / `recognition_core`.
    pub pin_workers: bool,
    pub capture_core: usize,
    pub recognition_core: usize,
    pub capture_stack_kib: usize,
    pub recognition_stack_kib: usize,
    pub scratch_budget_bytes: Option<usize>,
    pub stop_warn_secs: u64,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub chunk_size: usize,
    pub command_timeout_ms: u32,
    /// Script for the simulated engine; the built-in demo script when unset.
    pub script: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            pipeline: WorkersConfig::default(),
            engine: EngineConfig::default(),
            commands: Vocabulary::default().entries().to_vec(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            monitor: true,
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            pin_workers: true,
            capture_core: defaults::CAPTURE_CORE,
            recognition_core: defaults::RECOGNITION_CORE,
            capture_stack_kib: defaults::CAPTURE_STACK_KIB,
            recognition_stack_kib: defaults::RECOGNITION_STACK_KIB,
            scratch_budget_bytes: None,
            stop_warn_secs: defaults::STOP_WARN_INTERVAL.as_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::CHUNK_SIZE,
            command_timeout_ms: defaults::COMMAND_TIMEOUT_MS,
            script: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values. The result is validated.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoicectlError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VoicectlError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML and invalid values are still errors.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(VoicectlError::ConfigFileNotFound { .. }) => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOICECTL_INPUT_DEVICE → audio.input_device
    /// - VOICECTL_OUTPUT_DEVICE → audio.output_device
    /// - VOICECTL_SCRIPT → engine.script
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("VOICECTL_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("VOICECTL_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        if let Ok(script) = std::env::var("VOICECTL_SCRIPT")
            && !script.is_empty()
        {
            self.engine.script = Some(PathBuf::from(script));
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voicectl/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voicectl")
            .join("config.toml")
    }

    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be greater than 0"));
        }
        if self.engine.chunk_size == 0 {
            return Err(invalid("engine.chunk_size", "must be greater than 0"));
        }
        if self.engine.command_timeout_ms == 0 {
            return Err(invalid("engine.command_timeout_ms", "must be greater than 0"));
        }
        if self.pipeline.capture_stack_kib == 0 || self.pipeline.recognition_stack_kib == 0 {
            return Err(invalid("pipeline.*_stack_kib", "must be greater than 0"));
        }
        self.vocabulary()?;
        Ok(())
    }

    /// The configured command vocabulary.
    ///
    /// # Errors
    /// `Vocabulary` for duplicate ids or phrases and empty phrases.
    pub fn vocabulary(&self) -> Result<Vocabulary> {
        Vocabulary::new(self.commands.clone())
    }

    /// Derive the controller configuration.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig> {
        let pin = |core: usize| self.pipeline.pin_workers.then_some(core);
        Ok(PipelineConfig {
            sample_rate: self.audio.sample_rate,
            capture: WorkerSpec {
                name: capture::WORKER_NAME,
                core: pin(self.pipeline.capture_core),
                stack_kib: self.pipeline.capture_stack_kib,
            },
            recognition: WorkerSpec {
                name: recognition::WORKER_NAME,
                core: pin(self.pipeline.recognition_core),
                stack_kib: self.pipeline.recognition_stack_kib,
            },
            scratch_budget_bytes: self.pipeline.scratch_budget_bytes,
            monitor: self.audio.monitor,
            command_timeout_ms: self.engine.command_timeout_ms,
            stop_warn_interval: self.stop_warn_interval(),
            vocabulary: self.vocabulary()?,
        })
    }

    pub fn stop_warn_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.stop_warn_secs.max(1))
    }
}

fn invalid(key: &str, message: &str) -> VoicectlError {
    VoicectlError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
