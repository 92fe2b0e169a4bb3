use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use voicectl::app::{run_listen, run_loopback};
use voicectl::cli::{Cli, Commands, ConfigAction};
use voicectl::config::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    #[cfg(feature = "cpal-audio")]
    voicectl::sys::suppress_audio_warnings();

    match cli.command {
        Commands::Listen {
            audio,
            script,
            no_monitor,
            no_pin,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run_listen(config, audio, script, no_monitor, no_pin)?;
        }
        Commands::Loopback { audio, no_pin } => {
            let config = load_config(cli.config.as_deref())?;
            run_loopback(config, audio, no_pin)?;
        }
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "voicectl",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Default filter `info`; `-v` debug, `-vv` trace, `-q` warnings only.
/// `RUST_LOG` still wins when set.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/voicectl/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    use voicectl::audio::capture::{Direction, list_devices};

    for (title, direction) in [("input", Direction::Input), ("output", Direction::Output)] {
        let devices = voicectl::sys::with_suppressed_stderr(|| list_devices(direction))?;
        if devices.is_empty() {
            println!("{}", format!("No audio {} devices found", title).yellow());
            continue;
        }
        println!("Available audio {} devices:", title);
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }
    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("Built without audio device support (enable the cpal-audio feature)")
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&std::path::Path>) -> Result<()> {
    let config_path = custom_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    match action {
        ConfigAction::Show => {
            let config = Config::load_or_default(&config_path)?.with_env_overrides();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let marker = if config_path.exists() {
                "(exists)".green().to_string()
            } else {
                "(not created, using defaults)".dimmed().to_string()
            };
            println!("{} {}", config_path.display(), marker);
        }
    }
    Ok(())
}
