//! Host audio devices using CPAL (Cross-Platform Audio Library).
//!
//! The microphone is exposed as a 32-bit capture source and the speaker as a
//! 16-bit sink, so the pipeline sees the same formats it gets from an I2S
//! microphone and amplifier on the device.

use crate::audio::convert::{float_to_wide, narrow_sample, widen_sample};
use crate::audio::device::{AudioSink, AudioSource, Timeout};
use crate::audio::wav::resample;
use crate::error::{Result, VoicectlError};
use crate::sys::with_suppressed_stderr;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback frames buffered between the audio thread and the capture worker.
const CAPTURE_QUEUE_FRAMES: usize = 64;

/// Blocks buffered between the capture worker and the speaker callback.
const PLAYBACK_QUEUE_BLOCKS: usize = 8;

/// Preferred device names for PipeWire/PulseAudio environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns to filter out (not useful for a voice device).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Direction of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// List usable devices in one direction, marking preferred ones "\[recommended\]".
///
/// # Errors
/// Returns `VoicectlError::DeviceInit` if device enumeration fails.
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match direction {
            Direction::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            Direction::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
    })
    .map_err(|e| VoicectlError::DeviceInit {
        device: direction.label().to_string(),
        message: format!("Failed to enumerate devices: {}", e),
    })?;

    let mut names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                names.push(format!("{} [recommended]", name));
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

/// Find a device by exact name, or the best default (PipeWire, Pulse, system default).
fn find_device(direction: Direction, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        }
        .map_err(|e| VoicectlError::DeviceInit {
            device: direction.label().to_string(),
            message: format!("Failed to enumerate devices: {}", e),
        })?;

        if let Some(wanted) = name {
            return devices
                .into_iter()
                .find(|d| d.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| VoicectlError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|d| d.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        let fallback = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        fallback.ok_or_else(|| VoicectlError::AudioDeviceNotFound {
            device: format!("default {}", direction.label()),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is created, played and paused only by whoever owns the
/// device object, and a device object is owned by exactly one thread at a time
/// (the controller during start/stop, the worker in between, never both).
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

fn stream_config(channels: u16, sample_rate: u32) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Host microphone delivering 32-bit mono capture blocks.
pub struct CpalMicSource {
    device: cpal::Device,
    sample_rate: u32,
    stream: Option<SendableStream>,
    frames_tx: Sender<Vec<i32>>,
    frames_rx: Receiver<Vec<i32>>,
    pending: VecDeque<i32>,
    overflows: Arc<AtomicU64>,
}

impl CpalMicSource {
    /// Open an input device. `None` picks the best default.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(Direction::Input, device_name)?;
        let (frames_tx, frames_rx) = bounded(CAPTURE_QUEUE_FRAMES);
        Ok(Self {
            device,
            sample_rate,
            stream: None,
            frames_tx,
            frames_rx,
            pending: VecDeque::new(),
            overflows: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Build the input stream.
    ///
    /// Tries i16 then f32 at the pipeline rate in mono, then falls back to the
    /// device's native config with software channel mixing and resampling.
    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred = stream_config(1, self.sample_rate);
        let err_callback = |err| log::warn!("Microphone stream error: {}", err);

        let tx = self.frames_tx.clone();
        let overflows = Arc::clone(&self.overflows);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let frame = data.iter().map(|&s| widen_sample(s)).collect();
                push_frame(&tx, frame, &overflows);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let tx = self.frames_tx.clone();
        let overflows = Arc::clone(&self.overflows);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let frame = data.iter().map(|&s| float_to_wide(s)).collect();
                push_frame(&tx, frame, &overflows);
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| VoicectlError::DeviceInit {
                    device: "microphone".to_string(),
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let config: cpal::StreamConfig = default_config.clone().into();

        log::info!(
            "Using native microphone format ({}ch/{}Hz/{:?}), converting in software",
            channels,
            native_rate,
            default_config.sample_format()
        );

        let err_callback = |err| log::warn!("Microphone stream error: {}", err);
        let tx = self.frames_tx.clone();
        let overflows = Arc::clone(&self.overflows);

        let built = match default_config.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let wide: Vec<i32> = data.iter().map(|&s| widen_sample(s)).collect();
                    let frame = to_mono_at_rate(&wide, channels, native_rate, target_rate);
                    push_frame(&tx, frame, &overflows);
                },
                err_callback,
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let wide: Vec<i32> = data.iter().map(|&s| float_to_wide(s)).collect();
                    let frame = to_mono_at_rate(&wide, channels, native_rate, target_rate);
                    push_frame(&tx, frame, &overflows);
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(VoicectlError::DeviceInit {
                    device: "microphone".to_string(),
                    message: format!("Unsupported native sample format: {:?}", fmt),
                });
            }
        };

        built.map_err(|e| VoicectlError::DeviceInit {
            device: "microphone".to_string(),
            message: format!("Failed to build native input stream: {}", e),
        })
    }

    fn next_frame(&self, timeout: Timeout) -> Result<Option<Vec<i32>>> {
        let disconnected = || VoicectlError::DeviceRead {
            message: "microphone stream disconnected".to_string(),
        };
        match timeout {
            Timeout::Forever => self.frames_rx.recv().map(Some).map_err(|_| disconnected()),
            Timeout::Immediate => match self.frames_rx.try_recv() {
                Ok(frame) => Ok(Some(frame)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(disconnected()),
            },
            Timeout::After(wait) => match self.frames_rx.recv_timeout(wait) {
                Ok(frame) => Ok(Some(frame)),
                Err(RecvTimeoutError::Timeout) => Ok(None),
                Err(RecvTimeoutError::Disconnected) => Err(disconnected()),
            },
        }
    }
}

fn push_frame(tx: &Sender<Vec<i32>>, frame: Vec<i32>, overflows: &AtomicU64) {
    if let Err(TrySendError::Full(_)) = tx.try_send(frame) {
        overflows.fetch_add(1, Ordering::Relaxed);
    }
}

fn to_mono_at_rate(samples: &[i32], channels: usize, from: u32, to: u32) -> Vec<i32> {
    let mono: Vec<i32> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i64 = frame.iter().map(|&s| i64::from(s)).sum();
                (sum / channels as i64) as i32
            })
            .collect()
    };
    resample(&mono, from, to)
}

impl AudioSource for CpalMicSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.build_stream()?;
        stream.play().map_err(|e| VoicectlError::DeviceInit {
            device: "microphone".to_string(),
            message: format!("Failed to start audio stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| VoicectlError::DeviceInit {
                device: "microphone".to_string(),
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        let overflows = self.overflows.swap(0, Ordering::Relaxed);
        if overflows > 0 {
            log::warn!("Microphone dropped {} frames while the pipeline lagged", overflows);
        }
        self.pending.clear();
        Ok(())
    }

    fn read(&mut self, block: &mut [i32], timeout: Timeout) -> Result<usize> {
        let mut filled = 0;
        loop {
            while filled < block.len() {
                match self.pending.pop_front() {
                    Some(sample) => {
                        block[filled] = sample;
                        filled += 1;
                    }
                    None => break,
                }
            }
            if filled == block.len() {
                return Ok(filled);
            }
            match self.next_frame(timeout)? {
                Some(frame) => self.pending.extend(frame),
                None => return Ok(filled),
            }
        }
    }
}

/// Host speaker accepting 16-bit mono blocks.
pub struct CpalSpeakerSink {
    device: cpal::Device,
    sample_rate: u32,
    device_rate: u32,
    stream: Option<SendableStream>,
    blocks_tx: Sender<Vec<i16>>,
    blocks_rx: Receiver<Vec<i16>>,
}

impl CpalSpeakerSink {
    /// Open an output device. `None` picks the best default.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(Direction::Output, device_name)?;
        let (blocks_tx, blocks_rx) = bounded(PLAYBACK_QUEUE_BLOCKS);
        Ok(Self {
            device,
            sample_rate,
            device_rate: sample_rate,
            stream: None,
            blocks_tx,
            blocks_rx,
        })
    }

    fn build_stream(&mut self) -> Result<cpal::Stream> {
        let err_callback = |err| log::warn!("Speaker stream error: {}", err);

        let rx = self.blocks_rx.clone();
        let mut pending: VecDeque<i16> = VecDeque::new();
        if let Ok(stream) = self.device.build_output_stream(
            &stream_config(1, self.sample_rate),
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                for slot in data.iter_mut() {
                    *slot = next_output_sample(&rx, &mut pending);
                }
            },
            err_callback,
            None,
        ) {
            self.device_rate = self.sample_rate;
            return Ok(stream);
        }

        let default_config =
            self.device
                .default_output_config()
                .map_err(|e| VoicectlError::DeviceInit {
                    device: "speaker".to_string(),
                    message: format!("Failed to query default output config: {}", e),
                })?;
        let channels = default_config.channels() as usize;
        self.device_rate = default_config.sample_rate().0;
        let config: cpal::StreamConfig = default_config.clone().into();

        log::info!(
            "Using native speaker format ({}ch/{}Hz/{:?})",
            channels,
            self.device_rate,
            default_config.sample_format()
        );

        let rx = self.blocks_rx.clone();
        let mut pending: VecDeque<i16> = VecDeque::new();
        let built = match default_config.sample_format() {
            cpal::SampleFormat::I16 => self.device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels.max(1)) {
                        let sample = next_output_sample(&rx, &mut pending);
                        frame.fill(sample);
                    }
                },
                err_callback,
                None,
            ),
            cpal::SampleFormat::F32 => self.device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels.max(1)) {
                        let sample = next_output_sample(&rx, &mut pending);
                        frame.fill(f32::from(sample) / f32::from(i16::MAX));
                    }
                },
                err_callback,
                None,
            ),
            fmt => {
                return Err(VoicectlError::DeviceInit {
                    device: "speaker".to_string(),
                    message: format!("Unsupported native sample format: {:?}", fmt),
                });
            }
        };

        built.map_err(|e| VoicectlError::DeviceInit {
            device: "speaker".to_string(),
            message: format!("Failed to build output stream: {}", e),
        })
    }
}

fn next_output_sample(rx: &Receiver<Vec<i16>>, pending: &mut VecDeque<i16>) -> i16 {
    if pending.is_empty()
        && let Ok(block) = rx.try_recv()
    {
        pending.extend(block);
    }
    pending.pop_front().unwrap_or(0)
}

impl AudioSink for CpalSpeakerSink {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = self.build_stream()?;
        stream.play().map_err(|e| VoicectlError::DeviceInit {
            device: "speaker".to_string(),
            message: format!("Failed to start audio stream: {}", e),
        })?;
        self.stream = Some(SendableStream(stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| VoicectlError::DeviceInit {
                device: "speaker".to_string(),
                message: format!("Failed to stop audio stream: {}", e),
            })?;
        }
        while self.blocks_rx.try_recv().is_ok() {}
        Ok(())
    }

    fn write(&mut self, block: &[i16], timeout: Timeout) -> Result<usize> {
        let samples = if self.device_rate == self.sample_rate {
            block.to_vec()
        } else {
            let wide: Vec<i32> = block.iter().map(|&s| widen_sample(s)).collect();
            resample(&wide, self.sample_rate, self.device_rate)
                .into_iter()
                .map(narrow_sample)
                .collect()
        };

        let disconnected = || VoicectlError::DeviceWrite {
            message: "speaker stream disconnected".to_string(),
        };
        match timeout {
            Timeout::Immediate => match self.blocks_tx.try_send(samples) {
                Ok(()) => Ok(block.len()),
                Err(TrySendError::Full(_)) => Ok(0),
                Err(TrySendError::Disconnected(_)) => Err(disconnected()),
            },
            Timeout::Forever => self
                .blocks_tx
                .send(samples)
                .map(|()| block.len())
                .map_err(|_| disconnected()),
            Timeout::After(wait) => match self.blocks_tx.send_timeout(samples, wait) {
                Ok(()) => Ok(block.len()),
                Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => Ok(0),
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => Err(disconnected()),
            },
        }
    }
}
