//! Composition root: wires host devices, the scripted engine and actuators
//! into the pipeline and runs it until interrupted.

use crate::actuator::{LedAcknowledger, LedStrip, Rgb, SoftLed};
use crate::audio::device::{AudioSink, AudioSource, NullSink};
use crate::audio::wav::{WavFileSink, WavFileSource};
use crate::cli::AudioArgs;
use crate::command::ActionDispatcher;
use crate::config::Config;
use crate::engine::scripted::{self, Script, ScriptedClassifier};
use crate::engine::{CommandClassifier, FrontEndEngine};
use crate::error::{Result, VoicectlError};
use crate::pipeline::backend::{AudioBackend, Backend};
use crate::pipeline::{
    LoopbackConfig, LoopbackPipeline, PipelineConfig, PipelineController, StartOutcome,
    StatsSnapshot,
};
use crossbeam_channel::{RecvTimeoutError, bounded};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often the run loop checks for the end of a replay or the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Where audio comes from and goes to on this host.
#[derive(Debug, Clone, Default)]
pub struct HostAudio {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_wav: Option<PathBuf>,
    pub repeat: bool,
    pub record: Option<PathBuf>,
    pub monitor: bool,
    pub sample_rate: u32,
}

impl HostAudio {
    /// Merge CLI flags over the configured devices.
    pub fn resolve(config: &Config, args: &AudioArgs) -> Self {
        Self {
            input_device: args
                .input_device
                .clone()
                .or_else(|| config.audio.input_device.clone()),
            output_device: args
                .output_device
                .clone()
                .or_else(|| config.audio.output_device.clone()),
            input_wav: args.input_wav.clone(),
            repeat: args.repeat,
            record: args.record.clone(),
            monitor: config.audio.monitor,
            sample_rate: config.audio.sample_rate,
        }
    }
}

/// Backend for running on a host: cpal or WAV audio, scripted engine.
pub struct HostBackend {
    audio: HostAudio,
    chunk_size: usize,
    script: Script,
    // Created together with the front-end, handed out by `classifier`.
    pending_classifier: Option<ScriptedClassifier>,
    replay_finished: Arc<AtomicBool>,
}

impl HostBackend {
    pub fn new(audio: HostAudio, chunk_size: usize, script: Script) -> Self {
        Self {
            audio,
            chunk_size,
            script,
            pending_classifier: None,
            replay_finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set once a non-repeating WAV replay has run dry.
    pub fn replay_finished(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.replay_finished)
    }
}

impl AudioBackend for HostBackend {
    fn audio_source(&mut self, _block_size: usize) -> Result<Box<dyn AudioSource>> {
        if let Some(path) = &self.audio.input_wav {
            let source = WavFileSource::open(path, self.audio.sample_rate)?
                .with_realtime(true)
                .with_looping(self.audio.repeat)
                .with_finished_flag(Arc::clone(&self.replay_finished));
            log::info!("Replaying {} ({} samples)", path.display(), source.len());
            return Ok(Box::new(source));
        }
        microphone(self.audio.input_device.as_deref(), self.audio.sample_rate)
    }

    fn audio_sink(&mut self, _block_size: usize) -> Result<Box<dyn AudioSink>> {
        if !self.audio.monitor {
            return Ok(Box::new(NullSink));
        }
        if let Some(path) = &self.audio.record {
            log::info!("Recording monitor output to {}", path.display());
            return Ok(Box::new(WavFileSink::create(path, self.audio.sample_rate)?));
        }
        speaker(self.audio.output_device.as_deref(), self.audio.sample_rate)
    }
}

impl Backend for HostBackend {
    fn front_end(&mut self, config: &PipelineConfig) -> Result<Arc<dyn FrontEndEngine>> {
        let timeout = scripted::timeout_chunks(
            config.command_timeout_ms,
            config.sample_rate,
            self.chunk_size,
        );
        let (front_end, classifier) = scripted::pair(self.script.clone(), self.chunk_size, timeout);
        self.pending_classifier = Some(classifier);
        Ok(Arc::new(front_end))
    }

    fn classifier(&mut self, _config: &PipelineConfig) -> Result<Box<dyn CommandClassifier>> {
        self.pending_classifier
            .take()
            .map(|classifier| Box::new(classifier) as Box<dyn CommandClassifier>)
            .ok_or_else(|| VoicectlError::ClassifierUnavailable {
                message: "front-end must be created first".to_string(),
            })
    }
}

#[cfg(feature = "cpal-audio")]
fn microphone(device: Option<&str>, sample_rate: u32) -> Result<Box<dyn AudioSource>> {
    let source = crate::sys::with_suppressed_stderr(|| {
        crate::audio::capture::CpalMicSource::new(device, sample_rate)
    })?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "cpal-audio"))]
fn microphone(_device: Option<&str>, _sample_rate: u32) -> Result<Box<dyn AudioSource>> {
    Err(VoicectlError::AudioDeviceNotFound {
        device: "microphone (built without cpal-audio; use --input-wav)".to_string(),
    })
}

#[cfg(feature = "cpal-audio")]
fn speaker(device: Option<&str>, sample_rate: u32) -> Result<Box<dyn AudioSink>> {
    let sink = crate::sys::with_suppressed_stderr(|| {
        crate::audio::capture::CpalSpeakerSink::new(device, sample_rate)
    })?;
    Ok(Box::new(sink))
}

#[cfg(not(feature = "cpal-audio"))]
fn speaker(_device: Option<&str>, _sample_rate: u32) -> Result<Box<dyn AudioSink>> {
    Err(VoicectlError::AudioDeviceNotFound {
        device: "speaker (built without cpal-audio; use --record or --no-monitor)".to_string(),
    })
}

/// Pick the engine script: CLI flag, then config, then the built-in demo.
fn load_script(config: &Config, script: Option<PathBuf>) -> Result<Script> {
    match script.or_else(|| config.engine.script.clone()) {
        Some(path) => {
            log::info!("Engine script: {}", path.display());
            Script::load(&path)
        }
        None => {
            log::info!("No engine script configured, using the demo script");
            Ok(Script::demo(config.audio.sample_rate, config.engine.chunk_size))
        }
    }
}

/// Run the voice-command pipeline until Ctrl-C, `duration` or end of replay.
pub fn run_listen(
    mut config: Config,
    args: AudioArgs,
    script: Option<PathBuf>,
    no_monitor: bool,
    no_pin: bool,
) -> anyhow::Result<()> {
    if no_monitor {
        config.audio.monitor = false;
    }
    if no_pin {
        config.pipeline.pin_workers = false;
    }
    let pipeline_config = config.to_pipeline_config()?;

    let led = SoftLed::new();
    led.set_color(Rgb::INITIALISING)?;
    let led: Arc<dyn LedStrip> = Arc::new(led);

    let audio = HostAudio::resolve(&config, &args);
    let backend = HostBackend::new(
        audio,
        config.engine.chunk_size,
        load_script(&config, script)?,
    );
    let replay_finished = backend.replay_finished();
    let dispatcher = ActionDispatcher::new(pipeline_config.vocabulary.clone(), Arc::clone(&led));
    let phrases: Vec<String> = pipeline_config
        .vocabulary
        .entries()
        .iter()
        .map(|e| e.phrase.clone())
        .collect();

    let mut controller =
        PipelineController::new(pipeline_config, Box::new(backend), Arc::new(dispatcher))
            .with_acknowledger(Arc::new(LedAcknowledger::new(Arc::clone(&led))));

    if controller.start()? == StartOutcome::Started {
        led.set_color(Rgb::READY)?;
    }
    print_banner("Listening", &phrases.join(", "));

    wait_for_exit(args.duration, &replay_finished)?;

    controller.stop();
    led.clear()?;
    print_stats(&controller.stats());
    Ok(())
}

/// Forward the microphone to the speaker until Ctrl-C, `duration` or end of replay.
pub fn run_loopback(config: Config, args: AudioArgs, no_pin: bool) -> anyhow::Result<()> {
    let mut loopback_config = LoopbackConfig {
        stop_warn_interval: config.stop_warn_interval(),
        scratch_budget_bytes: config.pipeline.scratch_budget_bytes,
        ..LoopbackConfig::default()
    };
    loopback_config.worker.core = (!no_pin && config.pipeline.pin_workers)
        .then_some(config.pipeline.capture_core);
    loopback_config.worker.stack_kib = config.pipeline.capture_stack_kib;

    let mut audio = HostAudio::resolve(&config, &args);
    audio.monitor = true;
    let backend = HostBackend::new(audio, loopback_config.block_size, Script::default());
    let replay_finished = backend.replay_finished();

    let mut loopback = LoopbackPipeline::new(loopback_config, Box::new(backend));
    loopback.start()?;
    print_banner("Loopback", "microphone → speaker");

    wait_for_exit(args.duration, &replay_finished)?;

    loopback.stop();
    println!(
        "{} {} blocks forwarded",
        "Stopped:".dimmed(),
        loopback.blocks_forwarded()
    );
    Ok(())
}

/// Block until Ctrl-C, the optional deadline, or the replay running dry.
fn wait_for_exit(duration: Option<Duration>, replay_finished: &AtomicBool) -> anyhow::Result<()> {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        log::info!("Interrupted, shutting down");
        if stop_tx.try_send(()).is_err() {
            log::debug!("Shutdown already requested");
        }
    })?;

    let deadline = duration.map(|d| Instant::now() + d);
    loop {
        match stop_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
            Err(RecvTimeoutError::Timeout) => {}
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("Run duration elapsed");
            return Ok(());
        }
        if replay_finished.load(Ordering::SeqCst) {
            log::info!("Replay finished");
            return Ok(());
        }
    }
}

fn print_banner(mode: &str, detail: &str) {
    eprintln!(
        "{} {} {}",
        mode.green().bold(),
        detail,
        "(Ctrl-C to stop)".dimmed()
    );
}

fn print_stats(stats: &StatsSnapshot) {
    println!("{}", "Session summary:".bold());
    println!("  {}  {}", "Blocks:".dimmed(), stats.blocks_captured);
    println!("  {}    {}", "Wakes:".dimmed(), stats.wake_events);
    println!("  {} {}", "Commands:".dimmed(), stats.commands_dispatched);
    println!("  {} {}", "Timeouts:".dimmed(), stats.command_timeouts);
    let dropped = stats.short_reads + stats.read_errors + stats.feed_errors + stats.fetch_errors;
    if dropped > 0 {
        println!(
            "  {}   {} short reads, {} read errors, {} engine errors",
            "Errors:".yellow(),
            stats.short_reads,
            stats.read_errors,
            stats.feed_errors + stats.fetch_errors
        );
    }
}
