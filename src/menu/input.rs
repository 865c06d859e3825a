// src/menu/input.rs - Debounced up/down/select keys
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::config::InputConfig;
use crate::hardware::{HardwareError, Level, Pin, PinBank, PinMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Select,
}

/// Three pull-up inputs: idle high, pressed low.
pub struct Keypad {
    pins: Arc<dyn PinBank>,
    keys: [(Key, Pin); 3],
    debounce: Duration,
}

impl Keypad {
    pub fn new(pins: Arc<dyn PinBank>, config: &InputConfig) -> Self {
        Self {
            pins,
            keys: [
                (Key::Up, config.up_pin),
                (Key::Down, config.down_pin),
                (Key::Select, config.select_pin),
            ],
            debounce: config.debounce(),
        }
    }

    pub fn pin(&self, key: Key) -> Pin {
        self.keys
            .iter()
            .find_map(|(k, pin)| (*k == key).then_some(*pin))
            .unwrap_or(self.keys[0].1)
    }

    pub fn configure(&self) -> Result<(), HardwareError> {
        for (_, pin) in self.keys {
            self.pins.set_mode(pin, PinMode::InputPullUp)?;
        }
        Ok(())
    }

    /// First key, in up/down/select order, that reads low and is still low
    /// after the debounce delay.
    pub async fn read(&self) -> Result<Option<Key>, HardwareError> {
        for (key, pin) in self.keys {
            if self.pins.read(pin)? == Level::Low {
                sleep(self.debounce).await;
                if self.pins.read(pin)? == Level::Low {
                    tracing::debug!("Key {:?} pressed", key);
                    return Ok(Some(key));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimBoard;

    fn keypad(sim: &SimBoard) -> Keypad {
        let keypad = Keypad::new(sim.board().pins, &InputConfig::default());
        keypad.configure().unwrap();
        keypad
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_keys_read_nothing() {
        let sim = SimBoard::new();
        let keypad = keypad(&sim);
        assert_eq!(keypad.read().await.unwrap(), None);
        assert_eq!(sim.pin_mode(keypad.pin(Key::Select)), Some(PinMode::InputPullUp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounce_is_ignored() {
        let sim = SimBoard::new();
        let keypad = keypad(&sim);
        sim.press(keypad.pin(Key::Down), Duration::from_millis(5));
        assert_eq!(keypad.read().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_up_wins_over_select() {
        let sim = SimBoard::new();
        let keypad = keypad(&sim);
        sim.press(keypad.pin(Key::Select), Duration::from_millis(200));
        sim.press(keypad.pin(Key::Up), Duration::from_millis(200));
        assert_eq!(keypad.read().await.unwrap(), Some(Key::Up));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_pins_fail() {
        let sim = SimBoard::new();
        let keypad = Keypad::new(sim.board().pins, &InputConfig::default());
        assert!(keypad.read().await.is_err());
    }
}
