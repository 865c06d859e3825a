// src/dispatcher.rs - Command names to motion tasks, and menu sequences
//!
//! Two entry points:
//! - [`Dispatcher::execute`] starts one device command (the console surface)
//!   and returns as soon as the motion task is running.
//! - [`Dispatcher::run_selection`] runs a menu product's whole sequence:
//!   slide, then settle, then push for output positions.
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::actuator::{Action, DeviceCommand, GroupId, SlideCommand, UnknownCommand};
use crate::menu::screen::{STATUS_COMPLETE, STATUS_FAILED, STATUS_PROCESSING};
use crate::menu::{MenuItem, Screen};
use crate::motion::{
    Busy, MotionError, MotionHandle, MotionOutcome, MotionReport, MotionTarget, OperationGate,
    PusherController, SlideController,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Busy(#[from] Busy),
    #[error(transparent)]
    UnknownCommand(#[from] UnknownCommand),
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
    #[error("{0} was interrupted before reaching position")]
    Interrupted(MotionTarget),
    #[error(transparent)]
    Motion(#[from] MotionError),
}

/// What `execute` did with a command.
#[derive(Debug)]
pub enum CommandAck {
    /// A motion task is running; await the handle for its report.
    Started(MotionHandle),
    /// EXIT: output disabled. `gate_released` tells whether the group held the gate.
    Stopped { gate_released: bool },
}

/// Sub-step reports of one menu sequence, in execution order.
#[derive(Debug, Clone)]
pub struct SequenceReport {
    pub id: Uuid,
    pub item: String,
    pub command: DeviceCommand,
    pub steps: Vec<MotionReport>,
    pub started_at: Instant,
    pub finished_at: Instant,
}

impl SequenceReport {
    pub fn elapsed(&self) -> Duration {
        self.finished_at.duration_since(self.started_at)
    }
}

/// Slide and pusher of one lane.
pub struct Lane {
    pub slide: Arc<SlideController>,
    pub pusher: Arc<PusherController>,
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceTiming {
    pub settle: Duration,
    pub status_hold: Duration,
}

pub struct Dispatcher {
    gate: Arc<OperationGate>,
    lanes: [Lane; 2],
    screen: Arc<Screen>,
    timing: SequenceTiming,
}

impl Dispatcher {
    pub fn new(
        gate: Arc<OperationGate>,
        lanes: [Lane; 2],
        screen: Arc<Screen>,
        timing: SequenceTiming,
    ) -> Self {
        Self { gate, lanes, screen, timing }
    }

    pub fn lane(&self, group: GroupId) -> &Lane {
        &self.lanes[group.index()]
    }

    pub fn gate(&self) -> &Arc<OperationGate> {
        &self.gate
    }

    /// Parses a console name and executes it. Unknown names never reach the gate.
    pub fn execute_named(&self, name: &str) -> Result<CommandAck, DispatchError> {
        let command: DeviceCommand = name.parse().map_err(|e: UnknownCommand| {
            tracing::warn!("{}", e);
            e
        })?;
        self.execute(command)
    }

    pub fn execute(&self, command: DeviceCommand) -> Result<CommandAck, DispatchError> {
        let lane = self.lane(command.group);
        match command.action {
            Action::Slide(SlideCommand::Exit) => {
                let stopped = lane.slide.stop();
                let gate_released = self.gate.revoke(command.group);
                stopped?;
                Ok(CommandAck::Stopped { gate_released })
            }
            Action::Slide(cmd) => {
                let slide = Arc::clone(&lane.slide);
                let handle = self
                    .gate
                    .launch(slide.target(), move |permit| async move { slide.run(cmd, permit).await })?;
                Ok(CommandAck::Started(handle))
            }
            Action::Push => {
                let pusher = Arc::clone(&lane.pusher);
                let handle = self
                    .gate
                    .launch(pusher.target(), move |permit| async move { pusher.run(permit).await })?;
                Ok(CommandAck::Started(handle))
            }
        }
    }

    /// Starts `command` and waits for its report. Anything short of a full
    /// run counts as failure for a sequence.
    async fn run_step(&self, command: DeviceCommand) -> Result<MotionReport, DispatchError> {
        let handle = match self.execute(command)? {
            CommandAck::Started(handle) => handle,
            CommandAck::Stopped { .. } => {
                return Err(DispatchError::InvalidSelection(format!("{} is not a motion", command)));
            }
        };
        let report = handle.wait().await?;
        match report.outcome {
            MotionOutcome::Completed => Ok(report),
            _ => Err(DispatchError::Interrupted(report.target)),
        }
    }

    /// Runs a menu product's sequence with status line updates. Returns after
    /// the result has been on screen for the status hold time.
    pub async fn run_selection(&self, item: &MenuItem) -> Result<SequenceReport, DispatchError> {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("sequence", %id, command = %item.command);
        async move {
            self.screen.show_status(STATUS_PROCESSING);
            tracing::info!("Executing command: {} for group {}", item.command, item.group);
            let started_at = Instant::now();

            let result = self.sequence(item).await;
            match &result {
                Ok(steps) => {
                    tracing::info!("Sequence finished after {} step(s)", steps.len());
                    self.screen.show_status(STATUS_COMPLETE);
                }
                Err(e) => {
                    tracing::error!("Sequence failed: {}", e);
                    self.screen.show_status(STATUS_FAILED);
                }
            }
            let finished_at = Instant::now();
            sleep(self.timing.status_hold).await;

            result.map(|steps| SequenceReport {
                id,
                item: item.label.clone(),
                command: item.command,
                steps,
                started_at,
                finished_at,
            })
        }
        .instrument(span)
        .await
    }

    async fn sequence(&self, item: &MenuItem) -> Result<Vec<MotionReport>, DispatchError> {
        let command = item.command;
        if command.group != item.group {
            return Err(DispatchError::InvalidSelection(format!(
                "{} does not drive group {}",
                command, item.group
            )));
        }
        match command.action {
            Action::Slide(SlideCommand::Exhibit) => Ok(vec![self.run_step(command).await?]),
            Action::Slide(cmd) if cmd.is_output() => {
                let slide = self.run_step(command).await?;
                tracing::debug!("Waiting {} ms for the slide to settle", self.timing.settle.as_millis());
                sleep(self.timing.settle).await;
                let push = self.run_step(DeviceCommand::push(item.group)).await?;
                Ok(vec![slide, push])
            }
            _ => Err(DispatchError::InvalidSelection(format!(
                "{} is neither an exhibit nor an output command",
                command
            ))),
        }
    }
}
