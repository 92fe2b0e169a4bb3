//! WAV file audio devices: replay a recording as a capture source, and record
//! the monitor output into a file.

use crate::audio::convert::{float_to_wide, widen_sample};
use crate::audio::device::{AudioSink, AudioSource, Timeout};
use crate::error::{Result, VoicectlError};
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Audio source that replays WAV data as 32-bit capture blocks.
///
/// Any channel count and sample rate is accepted; the data is mixed to mono
/// and resampled to the pipeline rate up front. The final partial block is
/// delivered as a short read, exactly like a device running dry.
pub struct WavFileSource {
    samples: Vec<i32>,
    position: usize,
    sample_rate: u32,
    realtime: bool,
    looping: bool,
    next_due: Option<Instant>,
    finished: Arc<AtomicBool>,
}

impl WavFileSource {
    /// Open a WAV file for replay at `sample_rate`.
    pub fn open(path: &Path, sample_rate: u32) -> Result<Self> {
        let file = File::open(path).map_err(|e| VoicectlError::DeviceInit {
            device: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)), sample_rate)
    }

    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>, sample_rate: u32) -> Result<Self> {
        let wav_reader = hound::WavReader::new(reader).map_err(|e| VoicectlError::DeviceInit {
            device: "wav".to_string(),
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        let wide = read_wide_samples(wav_reader)?;
        let mono = mix_to_mono(&wide, spec.channels as usize);
        let samples = resample(&mono, spec.sample_rate, sample_rate);

        log::debug!(
            "WAV source: {} samples ({}ch/{}Hz/{}bit) -> {} mono samples at {}Hz",
            wide.len(),
            spec.channels,
            spec.sample_rate,
            spec.bits_per_sample,
            samples.len(),
            sample_rate
        );

        Ok(Self {
            samples,
            position: 0,
            sample_rate,
            realtime: false,
            looping: false,
            next_due: None,
            finished: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Deliver blocks no faster than the audio would play.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Start over at the beginning instead of running dry.
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Report end of replay through an existing flag.
    pub fn with_finished_flag(mut self, finished: Arc<AtomicBool>) -> Self {
        self.finished = finished;
        self
    }

    /// Total mono samples available for replay.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Flag set once a non-looping replay has delivered its last sample.
    pub fn finished_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    fn wait_for_block(&mut self, samples: usize) {
        if !self.realtime || self.sample_rate == 0 {
            return;
        }
        let block = Duration::from_secs_f64(samples as f64 / f64::from(self.sample_rate));
        let due = self.next_due.unwrap_or_else(Instant::now) + block;
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now));
    }
}

impl AudioSource for WavFileSource {
    fn start(&mut self) -> Result<()> {
        self.next_due = None;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read(&mut self, block: &mut [i32], _timeout: Timeout) -> Result<usize> {
        self.wait_for_block(block.len());

        if self.position >= self.samples.len() {
            if self.looping && !self.samples.is_empty() {
                self.position = 0;
            } else {
                self.finished.store(true, Ordering::SeqCst);
                return Ok(0);
            }
        }

        let end = std::cmp::min(self.position + block.len(), self.samples.len());
        let count = end - self.position;
        block[..count].copy_from_slice(&self.samples[self.position..end]);
        self.position = end;
        Ok(count)
    }
}

fn read_wide_samples<R: Read>(reader: hound::WavReader<R>) -> Result<Vec<i32>> {
    let spec = reader.spec();
    let parse_err = |e: hound::Error| VoicectlError::DeviceInit {
        device: "wav".to_string(),
        message: format!("Failed to read WAV samples: {}", e),
    };

    match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, _) => reader
            .into_samples::<f32>()
            .map(|s| s.map(float_to_wide))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(parse_err),
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .map(|s| s.map(widen_sample))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(parse_err),
        (hound::SampleFormat::Int, bits) if bits <= 32 => {
            let shift = 32 - u32::from(bits);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v << shift))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(parse_err)
        }
        (_, bits) => Err(VoicectlError::DeviceInit {
            device: "wav".to_string(),
            message: format!("Unsupported WAV bit depth: {}", bits),
        }),
    }
}

/// Average interleaved frames down to one channel.
fn mix_to_mono(samples: &[i32], channels: usize) -> Vec<i32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i64 = frame.iter().map(|&s| i64::from(s)).sum();
            (sum / channels as i64) as i32
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub(crate) fn resample(samples: &[i32], from_rate: u32, to_rate: u32) -> Vec<i32> {
    if from_rate == to_rate || samples.is_empty() || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = f64::from(samples[source_idx]);
                let right = f64::from(samples[source_idx + 1]);
                (left + (right - left) * fraction) as i32
            }
        })
        .collect()
}

/// Audio sink that records every accepted block into a 16-bit mono WAV file.
pub struct WavFileSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    written: usize,
}

impl WavFileSink {
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer =
            hound::WavWriter::create(path, spec).map_err(|e| VoicectlError::DeviceInit {
                device: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            writer: Some(writer),
            written: 0,
        })
    }

    /// Samples written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl AudioSink for WavFileSink {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize().map_err(|e| VoicectlError::DeviceWrite {
                message: format!("Failed to finalize WAV file: {}", e),
            })?;
            log::info!("Recorded {} monitor samples", self.written);
        }
        Ok(())
    }

    fn write(&mut self, block: &[i16], _timeout: Timeout) -> Result<usize> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(VoicectlError::DeviceWrite {
                message: "WAV sink already finalized".to_string(),
            });
        };
        for &sample in block {
            writer
                .write_sample(sample)
                .map_err(|e| VoicectlError::DeviceWrite {
                    message: e.to_string(),
                })?;
        }
        self.written += block.len();
        Ok(block.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn source_from(sample_rate: u32, channels: u16, samples: &[i16]) -> WavFileSource {
        let data = make_wav_data(sample_rate, channels, samples);
        WavFileSource::from_reader(Box::new(Cursor::new(data)), 16000).unwrap()
    }

    #[test]
    fn from_reader_16khz_mono_widens_samples() {
        let source = source_from(16000, 1, &[100, -200, 300]);

        assert_eq!(source.samples, vec![100 << 16, -200 << 16, 300 << 16]);
    }

    #[test]
    fn from_reader_stereo_downmixes_to_mono() {
        let source = source_from(16000, 2, &[100, 200, 300, 400]);

        assert_eq!(source.samples, vec![150 << 16, 350 << 16]);
    }

    #[test]
    fn from_reader_48khz_resamples_to_16khz() {
        let source = source_from(48000, 1, &vec![0i16; 48000]);

        assert!(source.len() >= 15900 && source.len() <= 16100);
    }

    #[test]
    fn read_delivers_full_blocks_then_short_read() {
        let mut source = source_from(16000, 1, &[1, 2, 3, 4, 5]);
        let mut block = vec![0i32; 2];

        assert_eq!(source.read(&mut block, Timeout::Forever).unwrap(), 2);
        assert_eq!(block, vec![1 << 16, 2 << 16]);
        assert_eq!(source.read(&mut block, Timeout::Forever).unwrap(), 2);
        assert_eq!(source.read(&mut block, Timeout::Forever).unwrap(), 1);
        assert!(!source.finished_handle().load(Ordering::SeqCst));
        assert_eq!(source.read(&mut block, Timeout::Forever).unwrap(), 0);
        assert!(source.finished_handle().load(Ordering::SeqCst));
    }

    #[test]
    fn looping_source_restarts() {
        let mut source = source_from(16000, 1, &[7, 8]).with_looping(true);
        let mut block = vec![0i32; 2];

        source.read(&mut block, Timeout::Forever).unwrap();
        assert_eq!(source.read(&mut block, Timeout::Forever).unwrap(), 2);
        assert_eq!(block, vec![7 << 16, 8 << 16]);
    }

    #[test]
    fn invalid_wav_is_device_init_error() {
        let result = WavFileSource::from_reader(Box::new(Cursor::new(vec![1u8, 2, 3])), 16000);
        assert!(matches!(result, Err(VoicectlError::DeviceInit { .. })));
    }

    #[test]
    fn resample_same_rate_is_identity() {
        assert_eq!(resample(&[1, 2, 3], 16000, 16000), vec![1, 2, 3]);
    }

    #[test]
    fn sink_records_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.wav");
        let mut sink = WavFileSink::create(&path, 16000).unwrap();

        sink.start().unwrap();
        assert_eq!(sink.write(&[1, -1, 300], Timeout::Immediate).unwrap(), 3);
        assert_eq!(sink.written(), 3);
        sink.stop().unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -1, 300]);
    }

    #[test]
    fn sink_rejects_writes_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavFileSink::create(&dir.path().join("x.wav"), 16000).unwrap();
        sink.stop().unwrap();

        assert!(matches!(
            sink.write(&[1], Timeout::Immediate),
            Err(VoicectlError::DeviceWrite { .. })
        ));
    }
}
