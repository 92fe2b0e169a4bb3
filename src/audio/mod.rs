//! Audio devices and sample conversion.

pub mod convert;
pub mod device;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub mod capture;

pub use device::{AudioSink, AudioSource, MockAudioSink, MockAudioSource, NullSink, Timeout};
pub use wav::{WavFileSink, WavFileSource};
