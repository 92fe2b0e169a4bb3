//! Actuators driven by recognised commands and wake events.

pub mod acknowledge;
pub mod led;

pub use acknowledge::{LedAcknowledger, LogAcknowledger, WakeAcknowledger};
pub use led::{LedMode, LedStrip, Rgb, SoftLed, hsv_to_rgb};
