//! Command-line interface for voicectl
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Wake phrase and voice command pipeline
#[derive(Parser, Debug)]
#[command(
    name = "voicectl",
    version,
    about = "Wake phrase and voice command pipeline"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a run duration.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`), and compound (`1h30m`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Audio endpoints shared by the runtime commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct AudioArgs {
    /// Audio input device name (see `voicectl devices`)
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device name
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Replay a WAV file instead of the microphone
    #[arg(long, value_name = "FILE", conflicts_with = "input_device")]
    pub input_wav: Option<PathBuf>,

    /// Keep replaying the WAV file from the start
    #[arg(long, requires = "input_wav")]
    pub repeat: bool,

    /// Write monitor output to a WAV file instead of the speaker
    #[arg(long, value_name = "FILE", conflicts_with = "output_device")]
    pub record: Option<PathBuf>,

    /// Stop after this long (e.g. 30s, 5m). Runs until Ctrl-C otherwise
    #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen for the wake phrase and dispatch voice commands
    Listen {
        #[command(flatten)]
        audio: AudioArgs,

        /// Script for the simulated engine (overrides engine.script)
        #[arg(long, value_name = "FILE")]
        script: Option<PathBuf>,

        /// Do not echo captured audio to the output
        #[arg(long)]
        no_monitor: bool,

        /// Leave the workers unpinned
        #[arg(long)]
        no_pin: bool,
    },

    /// Forward the microphone to the speaker
    Loopback {
        #[command(flatten)]
        audio: AudioArgs,

        /// Leave the worker unpinned
        #[arg(long)]
        no_pin: bool,
    },

    /// List audio input and output devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_defaults() {
        let cli = Cli::try_parse_from(["voicectl", "listen"]).unwrap();
        match cli.command {
            Commands::Listen {
                audio,
                script,
                no_monitor,
                no_pin,
            } => {
                assert!(audio.input_device.is_none());
                assert!(audio.input_wav.is_none());
                assert!(audio.duration.is_none());
                assert!(!audio.repeat);
                assert!(script.is_none());
                assert!(!no_monitor);
                assert!(!no_pin);
            }
            other => panic!("Expected Listen, got {:?}", other),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["voicectl"]).is_err());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["voicectl", "-vv", "devices"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["voicectl", "devices", "-q", "--config", "/tmp/c.toml"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }

    #[test]
    fn test_parse_listen_with_wav_and_script() {
        let cli = Cli::try_parse_from([
            "voicectl",
            "listen",
            "--input-wav",
            "in.wav",
            "--repeat",
            "--record",
            "out.wav",
            "--script",
            "demo.toml",
            "--duration",
            "1m30s",
        ])
        .unwrap();
        match cli.command {
            Commands::Listen { audio, script, .. } => {
                assert_eq!(audio.input_wav, Some(PathBuf::from("in.wav")));
                assert!(audio.repeat);
                assert_eq!(audio.record, Some(PathBuf::from("out.wav")));
                assert_eq!(audio.duration, Some(Duration::from_secs(90)));
                assert_eq!(script, Some(PathBuf::from("demo.toml")));
            }
            other => panic!("Expected Listen, got {:?}", other),
        }
    }

    #[test]
    fn test_input_wav_conflicts_with_device() {
        let result = Cli::try_parse_from([
            "voicectl",
            "listen",
            "--input-wav",
            "in.wav",
            "--input-device",
            "hw:0",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_repeat_requires_input_wav() {
        assert!(Cli::try_parse_from(["voicectl", "loopback", "--repeat"]).is_err());
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("5"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["voicectl", "config", "show"]).unwrap();
        match cli.command {
            Commands::Config { action } => assert_eq!(action, ConfigAction::Show),
            other => panic!("Expected Config, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["voicectl", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }
}
