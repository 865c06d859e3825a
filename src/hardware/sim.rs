// src/hardware/sim.rs - In-memory board used by the host binary and the tests
//!
//! Implements every hardware trait against shared in-memory state and keeps a
//! timestamped log of what the core did to the outputs. Timestamps come from
//! `tokio::time::Instant`, so they follow a paused test clock.
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{
    Board, Color, DeviceRegistry, Display, HardwareError, Level, Pin, PinBank, PinMode, PwmDevice,
    WHITE,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwEvent {
    PwmSet { device: String, channel: u8, period_ns: u32, pulse_ns: u32 },
    PwmEnable { device: String, channel: u8 },
    PwmDisable { device: String, channel: u8 },
    PinMode { pin: Pin, mode: PinMode },
    PinWrite { pin: Pin, level: Level },
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub at: Instant,
    pub event: HwEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOp {
    Clear(Color),
    Line { x1: u16, y1: u16, x2: u16, y2: u16, color: Color },
    Text { x: u16, y: u16, size: u8, text: String, color: Color },
}

#[derive(Debug)]
struct SimPwmState {
    channels: u8,
    visible: bool,
    enabled: HashMap<u8, bool>,
}

/// Most entries kept in the event log and in the draw list.
pub const HISTORY_LIMIT: usize = 4096;

#[derive(Debug, Default)]
struct SimState {
    log: VecDeque<Recorded>,
    pwm: BTreeMap<String, SimPwmState>,
    pwm_fault: bool,
    modes: HashMap<Pin, PinMode>,
    outputs: HashMap<Pin, Level>,
    pressed_until: HashMap<Pin, Instant>,
    draw_ops: VecDeque<DrawOp>,
}

impl SimState {
    fn record(&mut self, event: HwEvent) {
        tracing::trace!("sim: {:?}", event);
        push_bounded(&mut self.log, Recorded { at: Instant::now(), event });
    }

    fn draw(&mut self, op: DrawOp) {
        push_bounded(&mut self.draw_ops, op);
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T) {
    if buffer.len() == HISTORY_LIMIT {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

/// Shared handle to the simulated board. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct SimBoard {
    state: Arc<Mutex<SimState>>,
}

impl SimBoard {
    /// A board with the dispenser's PWM timer (`pwm2`, channels 1-4).
    pub fn new() -> Self {
        Self::default().with_pwm("pwm2", 4)
    }

    pub fn with_pwm(self, name: &str, channels: u8) -> Self {
        self.lock().pwm.insert(
            name.to_string(),
            SimPwmState { channels, visible: true, enabled: HashMap::new() },
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Hands out trait objects for the machine. The display shares this board's state.
    pub fn board(&self) -> Board {
        Board {
            registry: Arc::new(self.clone()),
            pins: Arc::new(self.clone()),
            display: Box::new(SimDisplay { board: self.clone(), foreground: WHITE }),
        }
    }

    /// Makes a PWM device disappear from (or reappear in) the registry.
    pub fn set_pwm_visible(&self, name: &str, visible: bool) {
        if let Some(pwm) = self.lock().pwm.get_mut(name) {
            pwm.visible = visible;
        }
    }

    /// While set, every PWM call fails with a device fault.
    pub fn set_pwm_fault(&self, fault: bool) {
        self.lock().pwm_fault = fault;
    }

    pub fn pwm_enabled(&self, device: &str, channel: u8) -> bool {
        self.lock()
            .pwm
            .get(device)
            .and_then(|pwm| pwm.enabled.get(&channel).copied())
            .unwrap_or(false)
    }

    pub fn output_level(&self, pin: Pin) -> Option<Level> {
        self.lock().outputs.get(&pin).copied()
    }

    pub fn pin_mode(&self, pin: Pin) -> Option<PinMode> {
        self.lock().modes.get(&pin).copied()
    }

    /// Holds an input pin low (pressed) for `hold`.
    pub fn press(&self, pin: Pin, hold: Duration) {
        self.lock().pressed_until.insert(pin, Instant::now() + hold);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.lock().log.iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.lock().log.clear();
    }

    pub fn draw_ops(&self) -> Vec<DrawOp> {
        self.lock().draw_ops.iter().cloned().collect()
    }

    pub fn clear_draw_ops(&self) {
        self.lock().draw_ops.clear();
    }

    /// Last non-blank text drawn at row `y`, trailing spaces trimmed.
    pub fn text_at(&self, y: u16) -> Option<String> {
        self.lock().draw_ops.iter().rev().find_map(|op| match op {
            DrawOp::Text { y: ty, text, .. } if *ty == y && !text.trim().is_empty() => {
                Some(text.trim_end().to_string())
            }
            _ => None,
        })
    }

    /// Color of the last non-blank text drawn at row `y`.
    pub fn text_color_at(&self, y: u16) -> Option<Color> {
        self.lock().draw_ops.iter().rev().find_map(|op| match op {
            DrawOp::Text { y: ty, text, color, .. } if *ty == y && !text.trim().is_empty() => {
                Some(*color)
            }
            _ => None,
        })
    }
}

impl DeviceRegistry for SimBoard {
    fn find_pwm(&self, name: &str) -> Option<Arc<dyn PwmDevice>> {
        let state = self.lock();
        let pwm = state.pwm.get(name)?;
        if !pwm.visible {
            return None;
        }
        Some(Arc::new(SimPwm { name: name.to_string(), board: self.clone() }))
    }
}

impl PinBank for SimBoard {
    fn set_mode(&self, pin: Pin, mode: PinMode) -> Result<(), HardwareError> {
        let mut state = self.lock();
        state.modes.insert(pin, mode);
        state.record(HwEvent::PinMode { pin, mode });
        Ok(())
    }

    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError> {
        let mut state = self.lock();
        if state.modes.get(&pin) != Some(&PinMode::Output) {
            return Err(HardwareError::PinMode(pin));
        }
        state.outputs.insert(pin, level);
        state.record(HwEvent::PinWrite { pin, level });
        Ok(())
    }

    fn read(&self, pin: Pin) -> Result<Level, HardwareError> {
        let state = self.lock();
        match state.modes.get(&pin) {
            Some(PinMode::InputPullUp) | Some(PinMode::Input) => {}
            _ => return Err(HardwareError::PinMode(pin)),
        }
        let pressed = state
            .pressed_until
            .get(&pin)
            .is_some_and(|until| Instant::now() < *until);
        Ok(if pressed { Level::Low } else { Level::High })
    }
}

struct SimPwm {
    name: String,
    board: SimBoard,
}

impl SimPwm {
    fn with_channel<T>(
        &self,
        channel: u8,
        f: impl FnOnce(&mut SimState) -> T,
    ) -> Result<T, HardwareError> {
        let mut state = self.board.lock();
        if state.pwm_fault {
            return Err(HardwareError::Fault(format!("{} not responding", self.name)));
        }
        let channels = state.pwm.get(&self.name).map(|pwm| pwm.channels).unwrap_or(0);
        if channel == 0 || channel > channels {
            return Err(HardwareError::InvalidChannel { device: self.name.clone(), channel });
        }
        Ok(f(&mut state))
    }

    fn set_enabled(&self, state: &mut SimState, channel: u8, enabled: bool) {
        if let Some(pwm) = state.pwm.get_mut(&self.name) {
            pwm.enabled.insert(channel, enabled);
        }
    }
}

impl PwmDevice for SimPwm {
    fn name(&self) -> &str {
        &self.name
    }

    fn set(&self, channel: u8, period_ns: u32, pulse_ns: u32) -> Result<(), HardwareError> {
        self.with_channel(channel, |state| {
            state.record(HwEvent::PwmSet { device: self.name.clone(), channel, period_ns, pulse_ns });
        })
    }

    fn enable(&self, channel: u8) -> Result<(), HardwareError> {
        self.with_channel(channel, |state| {
            self.set_enabled(state, channel, true);
            state.record(HwEvent::PwmEnable { device: self.name.clone(), channel });
        })
    }

    fn disable(&self, channel: u8) -> Result<(), HardwareError> {
        self.with_channel(channel, |state| {
            self.set_enabled(state, channel, false);
            state.record(HwEvent::PwmDisable { device: self.name.clone(), channel });
        })
    }
}

struct SimDisplay {
    board: SimBoard,
    foreground: Color,
}

impl Display for SimDisplay {
    fn clear(&mut self, background: Color) {
        // Nothing drawn before a full clear is visible any more.
        let mut state = self.board.lock();
        state.draw_ops.clear();
        state.draw(DrawOp::Clear(background));
    }

    fn set_color(&mut self, foreground: Color, _background: Color) {
        self.foreground = foreground;
    }

    fn draw_line(&mut self, x1: u16, y1: u16, x2: u16, y2: u16) {
        let color = self.foreground;
        self.board.lock().draw(DrawOp::Line { x1, y1, x2, y2, color });
    }

    fn show_string(&mut self, x: u16, y: u16, size: u8, text: &str) {
        let color = self.foreground;
        self.board
            .lock()
            .draw(DrawOp::Text { x, y, size, text: text.to_string(), color });
    }
}
