// src/lib.rs - Motion core of the two-lane vending dispenser
pub mod actuator;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod hardware;
pub mod machine;
pub mod menu;
pub mod motion;

// Re-exports for the host binary and tests
pub use crate::actuator::{ActuatorGroup, CommandTable, DeviceCommand, GroupId, SlideCommand, UnknownCommand};
pub use crate::config::{load_config, Config, ConfigError};
pub use crate::dispatcher::{CommandAck, DispatchError, Dispatcher, SequenceReport};
pub use crate::machine::{Machine, MachineError, MachineSnapshot};
pub use crate::menu::{MenuController, MenuItem};
pub use crate::motion::{Busy, GateScope, MotionError, MotionOutcome, MotionReport, MotionTarget, OperationGate};
