//! # Dispenser Configuration
//!
//! Every section is optional; missing values fall back to the constants the
//! dispenser board ships with.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [motor]
//! rpm = 200
//! steps_per_rev = 400
//!
//! [gate]
//! scope = "system"
//!
//! [[groups]]
//! id = 1
//! pwm_device = "pwm2"
//! pwm_channel = 4
//! dir_pin = "PA0"
//! push_pins = ["PA1", "PA2"]
//!
//! [groups.calibration]
//! endpoint_ms = 60000
//! exhibit_ms = 4360
//! out1_ms = 34020
//! transport_ms = 6000
//! out2_ms = 17590
//!
//! [[menu]]
//! label = "Snickers"
//! y = 50
//! group = 1
//! command = "EXHIBIT_1"
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::actuator::{Action, ActuatorGroup, CommandTable, DeviceCommand, GroupId, SlideCommand};
use crate::hardware::Pin;
use crate::menu::screen::{PANEL_HEIGHT, ROW_EXTENT};
use crate::menu::MenuItem;
use crate::motion::{DriveTiming, GateScope};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the dispenser core.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub motor: MotorConfig,
    #[serde(default)]
    pub pusher: PusherConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default = "default_groups")]
    pub groups: Vec<GroupConfig>,
    #[serde(default = "default_menu")]
    pub menu: Vec<MenuItemConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            motor: MotorConfig::default(),
            pusher: PusherConfig::default(),
            dispatch: DispatchConfig::default(),
            gate: GateConfig::default(),
            drive: DriveConfig::default(),
            input: InputConfig::default(),
            groups: default_groups(),
            menu: default_menu(),
        }
    }
}

/// Slide motor rate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorConfig {
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    #[serde(default = "default_steps_per_rev")]
    pub steps_per_rev: u32,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self { rpm: default_rpm(), steps_per_rev: default_steps_per_rev() }
    }
}

impl MotorConfig {
    pub fn timing(&self) -> DriveTiming {
        DriveTiming::from_rpm(self.rpm, self.steps_per_rev)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PusherConfig {
    #[serde(default = "default_dwell_ms")]
    pub dwell_ms: u64,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self { dwell_ms: default_dwell_ms() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Wait between the slide reaching the output position and the push.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// How long the result stays on the status line.
    #[serde(default = "default_status_hold_ms")]
    pub status_hold_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { settle_ms: default_settle_ms(), status_hold_ms: default_status_hold_ms() }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GateConfig {
    #[serde(default)]
    pub scope: GateScope,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DriveConfig {
    #[serde(default)]
    pub interruptible: bool,
}

/// Keypad wiring and polling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_up_pin")]
    pub up_pin: Pin,
    #[serde(default = "default_down_pin")]
    pub down_pin: Pin,
    #[serde(default = "default_select_pin")]
    pub select_pin: Pin,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            debounce_ms: default_debounce_ms(),
            up_pin: default_up_pin(),
            down_pin: default_down_pin(),
            select_pin: default_select_pin(),
        }
    }
}

impl InputConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// One lane's wiring and calibration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupConfig {
    pub id: GroupId,
    #[serde(default = "default_pwm_device")]
    pub pwm_device: String,
    pub pwm_channel: u8,
    pub dir_pin: Pin,
    pub push_pins: [Pin; 2],
    #[serde(default)]
    pub calibration: Option<CommandTable>,
}

impl GroupConfig {
    pub fn to_group(&self) -> ActuatorGroup {
        ActuatorGroup {
            id: self.id,
            pwm_device: self.pwm_device.clone(),
            pwm_channel: self.pwm_channel,
            dir_pin: self.dir_pin,
            push_pins: self.push_pins,
            table: self.calibration.clone().unwrap_or_else(|| CommandTable::for_group(self.id)),
        }
    }
}

impl From<&ActuatorGroup> for GroupConfig {
    fn from(group: &ActuatorGroup) -> Self {
        Self {
            id: group.id,
            pwm_device: group.pwm_device.clone(),
            pwm_channel: group.pwm_channel,
            dir_pin: group.dir_pin,
            push_pins: group.push_pins,
            calibration: Some(group.table.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MenuItemConfig {
    pub label: String,
    pub y: u16,
    pub group: GroupId,
    pub command: String,
}

impl MenuItemConfig {
    fn new(label: &str, y: u16, group: GroupId, command: &str) -> Self {
        Self { label: label.to_string(), y, group, command: command.to_string() }
    }

    pub fn to_item(&self) -> Result<MenuItem, ConfigError> {
        if self.y.checked_add(ROW_EXTENT).map_or(true, |bottom| bottom > PANEL_HEIGHT) {
            return Err(ConfigError::Invalid(format!(
                "menu item '{}': row at y = {} does not fit the {} px panel",
                self.label, self.y, PANEL_HEIGHT
            )));
        }
        let command: DeviceCommand = self
            .command
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("menu item '{}': {}", self.label, e)))?;
        if command.group != self.group {
            return Err(ConfigError::Invalid(format!(
                "menu item '{}': command {} does not belong to group {}",
                self.label, command, self.group
            )));
        }
        match command.action {
            Action::Slide(cmd) if cmd.is_output() || cmd == SlideCommand::Exhibit => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "menu item '{}': {} is neither an exhibit nor an output command",
                    self.label, command
                )));
            }
        }
        Ok(MenuItem { label: self.label.clone(), y: self.y, group: self.group, command })
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.motor.rpm == 0 || self.motor.steps_per_rev == 0 {
            return invalid("motor rpm and steps_per_rev must be > 0".to_string());
        }
        if self.pusher.dwell_ms == 0 {
            return invalid("pusher dwell_ms must be > 0".to_string());
        }
        if self.input.poll_interval_ms == 0 {
            return invalid("input poll_interval_ms must be > 0".to_string());
        }

        for id in GroupId::ALL {
            let count = self.groups.iter().filter(|g| g.id == id).count();
            if count != 1 {
                return invalid(format!("group {} must be configured exactly once, found {}", id, count));
            }
        }
        for group in &self.groups {
            if group.pwm_channel == 0 {
                return invalid(format!("group {} pwm_channel must be > 0", group.id));
            }
            if group.push_pins[0] == group.push_pins[1] {
                return invalid(format!("group {} push pins must differ", group.id));
            }
            if let Some(table) = &group.calibration {
                if table.durations().contains(&0) {
                    return invalid(format!("group {} calibration durations must be > 0", group.id));
                }
            }
        }

        if self.menu.is_empty() {
            return invalid("menu must contain at least one item".to_string());
        }
        for item in &self.menu {
            item.to_item()?;
        }
        Ok(())
    }

    pub fn group(&self, id: GroupId) -> Option<ActuatorGroup> {
        self.groups.iter().find(|g| g.id == id).map(GroupConfig::to_group)
    }

    pub fn menu_items(&self) -> Result<Vec<MenuItem>, ConfigError> {
        self.menu.iter().map(MenuItemConfig::to_item).collect()
    }
}

// Default value functions
fn default_rpm() -> u32 { 200 }
fn default_steps_per_rev() -> u32 { 400 }
fn default_dwell_ms() -> u64 { 5500 }
fn default_settle_ms() -> u64 { 2000 }
fn default_status_hold_ms() -> u64 { 2000 }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_debounce_ms() -> u64 { 20 }
fn default_up_pin() -> Pin { Pin::new('C', 5) }
fn default_down_pin() -> Pin { Pin::new('C', 1) }
fn default_select_pin() -> Pin { Pin::new('C', 3) }
fn default_pwm_device() -> String { "pwm2".to_string() }

fn default_groups() -> Vec<GroupConfig> {
    GroupId::ALL
        .into_iter()
        .map(|id| GroupConfig::from(&ActuatorGroup::default_for(id)))
        .collect()
}

fn default_menu() -> Vec<MenuItemConfig> {
    vec![
        MenuItemConfig::new("Snickers", 50, GroupId::One, "EXHIBIT_1"),
        MenuItemConfig::new("Fresh:3.50  ", 70, GroupId::One, "OUT1_1"),
        MenuItemConfig::new("Short:2.00  ", 90, GroupId::One, "OUT2_1"),
        MenuItemConfig::new("Halls Candies", 120, GroupId::Two, "EXHIBIT_2"),
        MenuItemConfig::new("Fresh:4.00  ", 140, GroupId::Two, "OUT1_2"),
        MenuItemConfig::new("Short:2.50  ", 160, GroupId::Two, "OUT2_2"),
    ]
}

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
