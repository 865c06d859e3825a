// src/hardware/mod.rs - Hardware boundary consumed by the dispenser core
//!
//! The core never touches registers directly. Everything it needs from the
//! board goes through the traits below: a PWM capability per lane, plain
//! digital pins, a device registry to look PWM devices up by name, and a
//! small text/graphics display.
pub mod sim;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("PWM channel {channel} is not available on {device}")]
    InvalidChannel { device: String, channel: u8 },
    #[error("Pin {0} is not configured for this operation")]
    PinMode(Pin),
    #[error("Invalid pin name '{0}'")]
    InvalidPin(String),
    #[error("Device fault: {0}")]
    Fault(String),
}

/// RGB565 colors used by the menu screen.
pub type Color = u16;

pub const WHITE: Color = 0xFFFF;
pub const BLACK: Color = 0x0000;
pub const RED: Color = 0xF800;
pub const GREEN: Color = 0x07E0;

/// A GPIO pin addressed by port letter and index, written like `PA0` or `PC5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pin {
    pub port: char,
    pub index: u8,
}

impl Pin {
    pub const fn new(port: char, index: u8) -> Self {
        Self { port, index }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}{}", self.port, self.index)
    }
}

impl FromStr for Pin {
    type Err = HardwareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_uppercase();
        let mut chars = name.chars();
        let (Some('P'), Some(port)) = (chars.next(), chars.next()) else {
            return Err(HardwareError::InvalidPin(s.to_string()));
        };
        if !port.is_ascii_uppercase() {
            return Err(HardwareError::InvalidPin(s.to_string()));
        }
        let index: u8 = chars
            .as_str()
            .parse()
            .map_err(|_| HardwareError::InvalidPin(s.to_string()))?;
        if index > 15 {
            return Err(HardwareError::InvalidPin(s.to_string()));
        }
        Ok(Pin::new(port, index))
    }
}

impl Serialize for Pin {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Pin {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Output,
    Input,
    InputPullUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// PWM output capability. Timings are in nanoseconds.
pub trait PwmDevice: Send + Sync {
    fn name(&self) -> &str;
    fn set(&self, channel: u8, period_ns: u32, pulse_ns: u32) -> Result<(), HardwareError>;
    fn enable(&self, channel: u8) -> Result<(), HardwareError>;
    fn disable(&self, channel: u8) -> Result<(), HardwareError>;
}

pub trait PinBank: Send + Sync {
    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<(), HardwareError>;
    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError>;
    fn read(&self, pin: Pin) -> Result<Level, HardwareError>;
}

/// Looks up named devices the way the RTOS device table does.
pub trait DeviceRegistry: Send + Sync {
    fn find_pwm(&self, name: &str) -> Option<Arc<dyn PwmDevice>>;
}

pub trait Display: Send {
    fn clear(&mut self, background: Color);
    fn set_color(&mut self, foreground: Color, background: Color);
    fn draw_line(&mut self, x1: u16, y1: u16, x2: u16, y2: u16);
    fn show_string(&mut self, x: u16, y: u16, size: u8, text: &str);
}

/// Everything the machine needs from one physical board.
pub struct Board {
    pub registry: Arc<dyn DeviceRegistry>,
    pub pins: Arc<dyn PinBank>,
    pub display: Box<dyn Display>,
}
