// src/actuator.rs - Lane model: groups, slide commands and calibration tables
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hardware::Pin;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown command '{0}'")]
pub struct UnknownCommand(pub String);

/// One of the two dispenser lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GroupId {
    One,
    Two,
}

impl GroupId {
    pub const ALL: [GroupId; 2] = [GroupId::One, GroupId::Two];

    pub fn number(self) -> u8 {
        match self {
            GroupId::One => 1,
            GroupId::Two => 2,
        }
    }

    pub fn index(self) -> usize {
        self.number() as usize - 1
    }
}

impl TryFrom<u8> for GroupId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(GroupId::One),
            2 => Ok(GroupId::Two),
            other => Err(format!("group id must be 1 or 2, got {}", other)),
        }
    }
}

impl From<GroupId> for u8 {
    fn from(id: GroupId) -> u8 {
        id.number()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Advance,
    Retract,
}

impl Direction {
    /// Level written to the direction pin.
    pub fn pin_high(self) -> bool {
        matches!(self, Direction::Advance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SlideCommand {
    Endpoint,
    Exhibit,
    Out1,
    Transport,
    Out2,
    Exit,
}

impl SlideCommand {
    pub const ALL: [SlideCommand; 6] = [
        SlideCommand::Endpoint,
        SlideCommand::Exhibit,
        SlideCommand::Out1,
        SlideCommand::Transport,
        SlideCommand::Out2,
        SlideCommand::Exit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SlideCommand::Endpoint => "ENDPOINT",
            SlideCommand::Exhibit => "EXHIBIT",
            SlideCommand::Out1 => "OUT1",
            SlideCommand::Transport => "TRANSPORT",
            SlideCommand::Out2 => "OUT2",
            SlideCommand::Exit => "EXIT",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.name() == name)
    }

    pub fn is_output(self) -> bool {
        matches!(self, SlideCommand::Out1 | SlideCommand::Out2)
    }
}

/// Resolved slide motion: which way and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub direction: Direction,
    pub duration: Duration,
}

/// Per-lane calibration. Durations are how long the slide runs to reach each position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTable {
    pub endpoint_ms: u64,
    pub exhibit_ms: u64,
    pub out1_ms: u64,
    pub transport_ms: u64,
    pub out2_ms: u64,
}

impl CommandTable {
    pub fn for_group(id: GroupId) -> Self {
        match id {
            GroupId::One => Self {
                endpoint_ms: 60_000,
                exhibit_ms: 4_360,
                out1_ms: 34_020,
                transport_ms: 6_000,
                out2_ms: 17_590,
            },
            GroupId::Two => Self {
                endpoint_ms: 60_000,
                exhibit_ms: 4_360,
                out1_ms: 28_920,
                transport_ms: 6_890,
                out2_ms: 17_590,
            },
        }
    }

    /// `None` for EXIT, which has no drive phase.
    pub fn lookup(&self, command: SlideCommand) -> Option<CommandSpec> {
        let (direction, ms) = match command {
            SlideCommand::Endpoint => (Direction::Retract, self.endpoint_ms),
            SlideCommand::Exhibit => (Direction::Advance, self.exhibit_ms),
            SlideCommand::Out1 => (Direction::Advance, self.out1_ms),
            SlideCommand::Transport => (Direction::Advance, self.transport_ms),
            SlideCommand::Out2 => (Direction::Advance, self.out2_ms),
            SlideCommand::Exit => return None,
        };
        Some(CommandSpec { direction, duration: Duration::from_millis(ms) })
    }

    pub(crate) fn durations(&self) -> [u64; 5] {
        [self.endpoint_ms, self.exhibit_ms, self.out1_ms, self.transport_ms, self.out2_ms]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Action {
    Slide(SlideCommand),
    Push,
}

/// A console command such as `OUT1_2` or `PUSH_CTRL_1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCommand {
    pub group: GroupId,
    pub action: Action,
}

impl DeviceCommand {
    pub fn slide(group: GroupId, command: SlideCommand) -> Self {
        Self { group, action: Action::Slide(command) }
    }

    pub fn push(group: GroupId) -> Self {
        Self { group, action: Action::Push }
    }

    /// Every command of both groups, in console order.
    pub fn all() -> Vec<DeviceCommand> {
        GroupId::ALL
            .into_iter()
            .flat_map(|group| {
                SlideCommand::ALL
                    .into_iter()
                    .map(move |cmd| DeviceCommand::slide(group, cmd))
                    .chain(std::iter::once(DeviceCommand::push(group)))
            })
            .collect()
    }

    pub fn help(&self) -> String {
        let g = self.group;
        match self.action {
            Action::Slide(SlideCommand::Endpoint) => format!("move Slide {} to endpoint position", g),
            Action::Slide(SlideCommand::Exhibit) => format!("move Slide {} to exhibit position", g),
            Action::Slide(SlideCommand::Out1) => format!("move Slide {} to output 1 position", g),
            Action::Slide(SlideCommand::Transport) => {
                format!("move Slide {} to transport position", g)
            }
            Action::Slide(SlideCommand::Out2) => format!("move Slide {} to output 2 position", g),
            Action::Slide(SlideCommand::Exit) => format!("stop Slide {} movement", g),
            Action::Push => format!("start Pusher {} for one round trip", g),
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Action::Slide(cmd) => write!(f, "{}_{}", cmd.name(), self.group),
            Action::Push => write!(f, "PUSH_CTRL_{}", self.group),
        }
    }
}

impl FromStr for DeviceCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_uppercase();
        let unknown = || UnknownCommand(s.trim().to_string());
        let (verb, suffix) = name.rsplit_once('_').ok_or_else(unknown)?;
        let group = suffix
            .parse::<u8>()
            .ok()
            .and_then(|n| GroupId::try_from(n).ok())
            .ok_or_else(unknown)?;
        if verb == "PUSH_CTRL" {
            return Ok(DeviceCommand::push(group));
        }
        SlideCommand::from_name(verb)
            .map(|cmd| DeviceCommand::slide(group, cmd))
            .ok_or_else(unknown)
    }
}

/// Static description of one lane's hardware.
#[derive(Debug, Clone)]
pub struct ActuatorGroup {
    pub id: GroupId,
    pub pwm_device: String,
    pub pwm_channel: u8,
    pub dir_pin: Pin,
    pub push_pins: [Pin; 2],
    pub table: CommandTable,
}

impl ActuatorGroup {
    /// The lane as wired on the dispenser board.
    pub fn default_for(id: GroupId) -> Self {
        match id {
            GroupId::One => Self {
                id,
                pwm_device: "pwm2".to_string(),
                pwm_channel: 4,
                dir_pin: Pin::new('A', 0),
                push_pins: [Pin::new('A', 1), Pin::new('A', 2)],
                table: CommandTable::for_group(id),
            },
            GroupId::Two => Self {
                id,
                pwm_device: "pwm2".to_string(),
                pwm_channel: 3,
                dir_pin: Pin::new('A', 5),
                push_pins: [Pin::new('A', 7), Pin::new('A', 6)],
                table: CommandTable::for_group(id),
            },
        }
    }
}
