// src/motion/pusher.rs - One forward/backward round trip of a lane's pusher
use std::sync::Arc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};

use super::{GatePermit, MotionError, MotionOutcome, MotionReport, MotionTarget};
use crate::actuator::{ActuatorGroup, DeviceCommand};
use crate::hardware::{Level, PinBank, PinMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PusherPhase {
    Idle,
    Forward,
    Backward,
    Done,
    Failed,
}

pub struct PusherController {
    group: ActuatorGroup,
    pins: Arc<dyn PinBank>,
    dwell: Duration,
    phase: watch::Sender<PusherPhase>,
}

impl PusherController {
    pub fn new(group: ActuatorGroup, pins: Arc<dyn PinBank>, dwell: Duration) -> Self {
        let (phase, _) = watch::channel(PusherPhase::Idle);
        Self { group, pins, dwell, phase }
    }

    pub fn target(&self) -> MotionTarget {
        MotionTarget::pusher(self.group.id)
    }

    pub fn phase(&self) -> PusherPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<PusherPhase> {
        self.phase.subscribe()
    }

    /// Always exactly one forward phase then one backward phase, each held for
    /// the dwell time. The pins stay in the backward state afterwards.
    pub async fn run(&self, permit: GatePermit) -> Result<MotionReport, MotionError> {
        let started_at = Instant::now();
        let name = DeviceCommand::push(self.group.id).to_string();
        tracing::info!("Command: {}", name);

        match self.round_trip().await {
            Ok(()) => {
                tracing::info!("Pusher {} completed one round trip", self.group.id);
                self.phase.send_replace(PusherPhase::Done);
                permit.release();
                Ok(MotionReport {
                    target: self.target(),
                    command: name,
                    outcome: MotionOutcome::Completed,
                    started_at,
                    finished_at: Instant::now(),
                })
            }
            Err(e) => {
                self.phase.send_replace(PusherPhase::Failed);
                tracing::error!("{} failed: {}", name, e);
                Err(e)
            }
        }
    }

    async fn round_trip(&self) -> Result<(), MotionError> {
        let [in1, in2] = self.group.push_pins;
        self.pins.set_mode(in1, PinMode::Output)?;
        self.pins.set_mode(in2, PinMode::Output)?;

        for phase in [PusherPhase::Forward, PusherPhase::Backward] {
            let forward = phase == PusherPhase::Forward;
            self.pins.write(in1, Level::from(forward))?;
            self.pins.write(in2, Level::from(!forward))?;
            self.phase.send_replace(phase);
            tracing::debug!(
                "Pusher {} moving {}",
                self.group.id,
                if forward { "forward" } else { "backward" }
            );
            sleep(self.dwell).await;
        }
        Ok(())
    }
}
