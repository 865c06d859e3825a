// src/motion/mod.rs - Open-loop timed motion for slides and pushers
pub mod gate;
pub mod pusher;
pub mod slide;

pub use gate::{Busy, GatePermit, GateScope, GateSnapshot, MotionHandle, OperationGate};
pub use pusher::{PusherController, PusherPhase};
pub use slide::{SlideController, SlidePhase};

use std::fmt;
use serde::Serialize;
use thiserror::Error;
use tokio::time::{Duration, Instant};

use crate::actuator::GroupId;
use crate::hardware::HardwareError;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("PWM device {device} not found")]
    ResourceUnavailable { device: String },
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Motion worker for {0} ended without reporting")]
    WorkerLost(MotionTarget),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MotionKind {
    Slide,
    Pusher,
}

/// What a motion task drives: one component of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MotionTarget {
    pub group: GroupId,
    pub kind: MotionKind,
}

impl MotionTarget {
    pub fn slide(group: GroupId) -> Self {
        Self { group, kind: MotionKind::Slide }
    }

    pub fn pusher(group: GroupId) -> Self {
        Self { group, kind: MotionKind::Pusher }
    }
}

impl fmt::Display for MotionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MotionKind::Slide => write!(f, "Slide {}", self.group),
            MotionKind::Pusher => write!(f, "Pusher {}", self.group),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MotionOutcome {
    /// Ran for the full commanded time.
    Completed,
    /// EXIT reached the lane while the drive was running.
    Aborted,
    /// EXIT: output disabled, nothing driven.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MotionReport {
    pub target: MotionTarget,
    pub command: String,
    pub outcome: MotionOutcome,
    pub started_at: Instant,
    pub finished_at: Instant,
}

impl MotionReport {
    pub fn elapsed(&self) -> Duration {
        self.finished_at.duration_since(self.started_at)
    }
}

/// Step pulse timing for the slide motor at a fixed angular rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveTiming {
    pub period_ns: u32,
    pub pulse_ns: u32,
}

impl DriveTiming {
    pub fn from_rpm(rpm: u32, steps_per_rev: u32) -> Self {
        let steps_per_minute = (rpm.max(1) as u64) * (steps_per_rev.max(1) as u64);
        let period = 60 * 1_000_000_000u64 / steps_per_minute;
        let period_ns = u32::try_from(period).unwrap_or(u32::MAX);
        Self { period_ns, pulse_ns: period_ns / 2 }
    }
}

impl Default for DriveTiming {
    fn default() -> Self {
        Self::from_rpm(200, 400)
    }
}
