//! Status LED control.

use crate::error::{Result, VoicectlError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Brightness applied until someone sets another one (0-255).
pub const DEFAULT_BRIGHTNESS: u8 = 15;

/// Rainbow effect: hue advances 2 degrees per step.
const RAINBOW_STEP: Duration = Duration::from_millis(20);
const RAINBOW_HUE_STEP: u64 = 2;

/// An RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    /// Status colour while the pipeline starts.
    pub const INITIALISING: Rgb = Rgb::new(30, 0, 0);
    /// Status colour once the pipeline listens.
    pub const READY: Rgb = Rgb::new(0, 30, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }
}

/// What the LED is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedMode {
    Off,
    Solid(Rgb),
    Rainbow,
}

/// Single-pixel LED strip.
///
/// Shared between the recognition worker and the application, hence `&self`.
pub trait LedStrip: Send + Sync {
    fn set_color(&self, color: Rgb) -> Result<()>;

    /// Brightness used by effects (0-255).
    fn set_brightness(&self, brightness: u8) -> Result<()>;

    /// Cycle through the hue circle until [`LedStrip::clear`]. Idempotent.
    fn start_rainbow(&self) -> Result<()>;

    /// Stop any effect and switch the pixel off.
    fn clear(&self) -> Result<()>;

    /// What the strip shows right now.
    fn current_mode(&self) -> Result<LedMode>;

    /// Show `mode`, e.g. one saved earlier with [`LedStrip::current_mode`].
    fn set_mode(&self, mode: LedMode) -> Result<()> {
        match mode {
            LedMode::Off => self.clear(),
            LedMode::Solid(color) => self.set_color(color),
            LedMode::Rainbow => self.start_rainbow(),
        }
    }
}

impl<T: LedStrip + ?Sized> LedStrip for Arc<T> {
    fn set_color(&self, color: Rgb) -> Result<()> {
        (**self).set_color(color)
    }

    fn set_brightness(&self, brightness: u8) -> Result<()> {
        (**self).set_brightness(brightness)
    }

    fn start_rainbow(&self) -> Result<()> {
        (**self).start_rainbow()
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }

    fn current_mode(&self) -> Result<LedMode> {
        (**self).current_mode()
    }

    fn set_mode(&self, mode: LedMode) -> Result<()> {
        (**self).set_mode(mode)
    }
}

/// Convert HSV (hue in degrees, saturation and value 0-255) to RGB.
pub fn hsv_to_rgb(hue: u16, saturation: u8, value: u8) -> Rgb {
    let h = u32::from(hue % 360);
    let s = u32::from(saturation);
    let v = u32::from(value);

    let region = h / 60;
    let remainder = (h - region * 60) * 255 / 60;

    let p = (v * (255 - s) / 255) as u8;
    let q = (v * (255 - (s * remainder) / 255) / 255) as u8;
    let t = (v * (255 - (s * (255 - remainder)) / 255) / 255) as u8;
    let v = v as u8;

    match region {
        0 => Rgb::new(v, t, p),
        1 => Rgb::new(q, v, p),
        2 => Rgb::new(p, v, t),
        3 => Rgb::new(p, q, v),
        4 => Rgb::new(t, p, v),
        _ => Rgb::new(v, p, q),
    }
}

#[derive(Debug)]
struct SoftLedState {
    mode: LedMode,
    brightness: u8,
    rainbow_started: Option<Instant>,
}

/// LED that keeps its state in memory and logs every change.
///
/// Used on hosts without an addressable LED, and in tests.
#[derive(Debug, Clone)]
pub struct SoftLed {
    state: Arc<Mutex<SoftLedState>>,
}

impl SoftLed {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SoftLedState {
                mode: LedMode::Off,
                brightness: DEFAULT_BRIGHTNESS,
                rainbow_started: None,
            })),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SoftLedState) -> R) -> Result<R> {
        let mut state = self.state.lock().map_err(|e| VoicectlError::Actuator {
            actuator: "led",
            message: format!("Failed to lock LED state: {}", e),
        })?;
        Ok(f(&mut state))
    }

    pub fn mode(&self) -> LedMode {
        self.with_state(|s| s.mode).unwrap_or(LedMode::Off)
    }

    pub fn brightness(&self) -> u8 {
        self.with_state(|s| s.brightness).unwrap_or(0)
    }

    /// Colour the pixel shows right now.
    pub fn current_color(&self) -> Rgb {
        self.with_state(|s| match s.mode {
            LedMode::Off => Rgb::OFF,
            LedMode::Solid(color) => color,
            LedMode::Rainbow => {
                let steps = s
                    .rainbow_started
                    .map(|t| (t.elapsed().as_millis() / RAINBOW_STEP.as_millis()) as u64)
                    .unwrap_or(0);
                let hue = ((steps * RAINBOW_HUE_STEP) % 360) as u16;
                hsv_to_rgb(hue, 255, s.brightness)
            }
        })
        .unwrap_or(Rgb::OFF)
    }
}

impl Default for SoftLed {
    fn default() -> Self {
        Self::new()
    }
}

impl LedStrip for SoftLed {
    fn set_color(&self, color: Rgb) -> Result<()> {
        self.with_state(|s| {
            s.mode = LedMode::Solid(color);
            s.rainbow_started = None;
        })?;
        log::info!(
            "LED colour #{:02x}{:02x}{:02x}",
            color.red,
            color.green,
            color.blue
        );
        Ok(())
    }

    fn set_brightness(&self, brightness: u8) -> Result<()> {
        self.with_state(|s| s.brightness = brightness)?;
        log::debug!("LED brightness {}", brightness);
        Ok(())
    }

    fn start_rainbow(&self) -> Result<()> {
        let started = self.with_state(|s| {
            if s.mode == LedMode::Rainbow {
                return false;
            }
            s.mode = LedMode::Rainbow;
            s.rainbow_started = Some(Instant::now());
            true
        })?;
        if started {
            log::info!("LED rainbow on");
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.with_state(|s| {
            s.mode = LedMode::Off;
            s.rainbow_started = None;
        })?;
        log::info!("LED off");
        Ok(())
    }

    fn current_mode(&self) -> Result<LedMode> {
        self.with_state(|s| s.mode)
    }
}
