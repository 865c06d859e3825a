// src/motion/slide.rs - Timed directional drive of one lane's slide
use std::sync::{Arc, Mutex};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, Duration, Instant};

use super::{DriveTiming, GatePermit, MotionError, MotionOutcome, MotionReport, MotionTarget};
use crate::actuator::{ActuatorGroup, DeviceCommand, SlideCommand};
use crate::hardware::{DeviceRegistry, Level, PinBank, PinMode, PwmDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlidePhase {
    Idle,
    Resolving,
    Driving,
    Settling,
    Done,
    Failed,
}

/// Runs one slide motion per invocation: resolve the PWM device, set the
/// direction, enable the motor, wait out the calibrated duration, disable.
pub struct SlideController {
    group: ActuatorGroup,
    registry: Arc<dyn DeviceRegistry>,
    pins: Arc<dyn PinBank>,
    timing: DriveTiming,
    interruptible: bool,
    pwm: Mutex<Option<Arc<dyn PwmDevice>>>,
    phase: watch::Sender<SlidePhase>,
    abort: watch::Sender<u64>,
}

impl SlideController {
    pub fn new(
        group: ActuatorGroup,
        registry: Arc<dyn DeviceRegistry>,
        pins: Arc<dyn PinBank>,
        timing: DriveTiming,
    ) -> Self {
        let (phase, _) = watch::channel(SlidePhase::Idle);
        let (abort, _) = watch::channel(0);
        Self {
            group,
            registry,
            pins,
            timing,
            interruptible: false,
            pwm: Mutex::new(None),
            phase,
            abort,
        }
    }

    /// Let EXIT cut the settling sleep short instead of only disabling the output.
    pub fn with_interruptible_drive(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    pub fn group(&self) -> &ActuatorGroup {
        &self.group
    }

    pub fn target(&self) -> MotionTarget {
        MotionTarget::slide(self.group.id)
    }

    pub fn phase(&self) -> SlidePhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<SlidePhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: SlidePhase) {
        tracing::debug!("Slide {} -> {:?}", self.group.id, phase);
        self.phase.send_replace(phase);
    }

    /// Looks the PWM device up once and caches it. A failed lookup is not cached.
    pub fn resolve_pwm(&self) -> Result<Arc<dyn PwmDevice>, MotionError> {
        let mut cached = match self.pwm.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(pwm) = cached.as_ref() {
            return Ok(Arc::clone(pwm));
        }
        match self.registry.find_pwm(&self.group.pwm_device) {
            Some(pwm) => {
                *cached = Some(Arc::clone(&pwm));
                Ok(pwm)
            }
            None => {
                tracing::error!("PWM device {} not found!", self.group.pwm_device);
                Err(MotionError::ResourceUnavailable { device: self.group.pwm_device.clone() })
            }
        }
    }

    /// Runs `command` to completion while holding `permit`.
    pub async fn run(
        &self,
        command: SlideCommand,
        permit: GatePermit,
    ) -> Result<MotionReport, MotionError> {
        let started_at = Instant::now();
        let name = DeviceCommand::slide(self.group.id, command).to_string();
        tracing::info!("Command: {}", name);
        self.set_phase(SlidePhase::Resolving);

        match self.drive(command).await {
            Ok(outcome) => {
                self.set_phase(SlidePhase::Done);
                permit.release();
                match outcome {
                    MotionOutcome::Stopped | MotionOutcome::Aborted => {
                        tracing::info!("Slide {} stopped", self.group.id)
                    }
                    _ => tracing::info!(
                        "Slide {} movement complete, ready for next command",
                        self.group.id
                    ),
                }
                Ok(MotionReport {
                    target: self.target(),
                    command: name,
                    outcome,
                    started_at,
                    finished_at: Instant::now(),
                })
            }
            Err(e) => {
                self.set_phase(SlidePhase::Failed);
                tracing::error!("{} failed: {}", name, e);
                Err(e)
            }
        }
    }

    async fn drive(&self, command: SlideCommand) -> Result<MotionOutcome, MotionError> {
        // Subscribed before energizing so an EXIT at any point of this drive is seen.
        let abort = self.abort.subscribe();
        let pwm = self.resolve_pwm()?;
        let channel = self.group.pwm_channel;
        self.pins.set_mode(self.group.dir_pin, PinMode::Output)?;

        let Some(spec) = self.group.table.lookup(command) else {
            pwm.disable(channel)?;
            return Ok(MotionOutcome::Stopped);
        };

        self.set_phase(SlidePhase::Driving);
        if let Err(e) = self.energize(pwm.as_ref(), spec.direction.pin_high()) {
            let _ = pwm.disable(channel);
            return Err(e);
        }

        self.set_phase(SlidePhase::Settling);
        let outcome = self.settle(spec.duration, abort).await;
        pwm.disable(channel)?;
        Ok(outcome)
    }

    fn energize(&self, pwm: &dyn PwmDevice, advance: bool) -> Result<(), MotionError> {
        let channel = self.group.pwm_channel;
        self.pins.write(self.group.dir_pin, Level::from(advance))?;
        pwm.set(channel, self.timing.period_ns, self.timing.pulse_ns)?;
        pwm.enable(channel)?;
        Ok(())
    }

    /// Waits out the drive. An EXIT seen during the drive turns the outcome
    /// into `Aborted`; only an interruptible drive also ends the sleep early.
    async fn settle(&self, duration: Duration, mut abort: watch::Receiver<u64>) -> MotionOutcome {
        if !self.interruptible {
            sleep(duration).await;
            return if abort.has_changed().unwrap_or(false) {
                tracing::info!("Slide {} was stopped during the drive", self.group.id);
                MotionOutcome::Aborted
            } else {
                MotionOutcome::Completed
            };
        }
        tokio::select! {
            _ = sleep(duration) => MotionOutcome::Completed,
            _ = abort.changed() => {
                tracing::info!("Slide {} drive interrupted", self.group.id);
                MotionOutcome::Aborted
            }
        }
    }

    /// EXIT: disables the channel right away and signals any running drive.
    /// Does not wait for the running worker, whose sleep continues unless the
    /// drive is interruptible.
    pub fn stop(&self) -> Result<(), MotionError> {
        tracing::info!("Command: {}", DeviceCommand::slide(self.group.id, SlideCommand::Exit));
        let pwm = self.resolve_pwm()?;
        pwm.disable(self.group.pwm_channel)?;
        self.abort.send_modify(|generation| *generation = generation.wrapping_add(1));
        tracing::info!("Slide {} stopped", self.group.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::GroupId;
    use crate::hardware::sim::SimBoard;
    use crate::motion::{GateScope, OperationGate};

    fn controller(sim: &SimBoard, id: GroupId) -> SlideController {
        let board = sim.board();
        SlideController::new(ActuatorGroup::default_for(id), board.registry, board.pins, DriveTiming::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhibit_runs_for_table_duration() {
        let sim = SimBoard::new();
        let slide = controller(&sim, GroupId::One);
        let gate = OperationGate::new(GateScope::System);
        let permit = gate.try_acquire(slide.target()).unwrap();

        let report = slide.run(SlideCommand::Exhibit, permit).await.unwrap();
        assert_eq!(report.outcome, MotionOutcome::Completed);
        assert!(report.elapsed() >= Duration::from_millis(4_360));
        assert!(report.elapsed() < Duration::from_millis(4_362));
        assert_eq!(report.command, "EXHIBIT_1");
        assert_eq!(slide.phase(), SlidePhase::Done);
        assert!(!sim.pwm_enabled("pwm2", 4));
        assert_eq!(sim.output_level(slide.group().dir_pin), Some(Level::High));
        assert!(gate.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_during_drive_reports_aborted() {
        let sim = SimBoard::new();
        let slide = Arc::new(controller(&sim, GroupId::Two));
        let gate = OperationGate::new(GateScope::System);
        let permit = gate.try_acquire(slide.target()).unwrap();

        let worker = Arc::clone(&slide);
        let task = tokio::spawn(async move { worker.run(SlideCommand::Out1, permit).await });
        sleep(Duration::from_millis(1_000)).await;
        slide.stop().unwrap();
        assert!(!sim.pwm_enabled("pwm2", 3));

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.outcome, MotionOutcome::Aborted);
        // Without an interruptible drive the worker still sleeps the full time.
        assert!(report.elapsed() >= Duration::from_millis(28_920));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_before_drive_does_not_leak_into_next_run() {
        let sim = SimBoard::new();
        let slide = controller(&sim, GroupId::One);
        slide.stop().unwrap();
        let gate = OperationGate::new(GateScope::System);
        let permit = gate.try_acquire(slide.target()).unwrap();
        let report = slide.run(SlideCommand::Exhibit, permit).await.unwrap();
        assert_eq!(report.outcome, MotionOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_device_fails_and_is_not_cached() {
        let sim = SimBoard::new();
        sim.set_pwm_visible("pwm2", false);
        let slide = controller(&sim, GroupId::Two);
        let gate = OperationGate::new(GateScope::System);

        let permit = gate.try_acquire(slide.target()).unwrap();
        let err = slide.run(SlideCommand::Out1, permit).await.unwrap_err();
        assert!(matches!(err, MotionError::ResourceUnavailable { .. }));
        assert_eq!(slide.phase(), SlidePhase::Failed);
        assert!(gate.is_idle());
        assert!(sim.events().is_empty());

        sim.set_pwm_visible("pwm2", true);
        assert!(slide.resolve_pwm().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_while_energizing_disables_output() {
        let sim = SimBoard::new();
        let slide = controller(&sim, GroupId::One);
        slide.resolve_pwm().unwrap();
        sim.set_pwm_fault(true);
        let gate = OperationGate::new(GateScope::System);
        let permit = gate.try_acquire(slide.target()).unwrap();
        let err = slide.run(SlideCommand::Transport, permit).await.unwrap_err();
        assert!(matches!(err, MotionError::Hardware(_)));
        assert!(!sim.pwm_enabled("pwm2", 4));
        assert!(gate.is_idle());
    }
}
