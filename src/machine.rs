// src/machine.rs - The dispenser: one long-lived owner of gate, lanes and menu
use std::sync::{Arc, Mutex};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Duration;

use crate::actuator::GroupId;
use crate::config::{Config, ConfigError};
use crate::dispatcher::{Dispatcher, Lane, SequenceTiming};
use crate::hardware::{Board, HardwareError, PinBank};
use crate::menu::{lock_menu, Keypad, MenuController, MenuLoop, MenuSnapshot, Screen};
use crate::motion::{GateSnapshot, OperationGate, PusherController, PusherPhase, SlideController, SlidePhase};

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

#[derive(Debug, Clone, Serialize)]
pub struct LaneSnapshot {
    pub group: GroupId,
    pub slide: SlidePhase,
    pub pusher: PusherPhase,
}

/// Point-in-time view for the console `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct MachineSnapshot {
    pub gate: GateSnapshot,
    pub menu: MenuSnapshot,
    pub lanes: Vec<LaneSnapshot>,
}

pub struct Machine {
    config: Config,
    gate: Arc<OperationGate>,
    dispatcher: Arc<Dispatcher>,
    menu: Arc<Mutex<MenuController>>,
    screen: Arc<Screen>,
    pins: Arc<dyn PinBank>,
}

impl Machine {
    /// Builds everything from `config`, configures the key inputs, looks the
    /// PWM devices up once and draws the menu.
    pub fn new(config: Config, board: Board) -> Result<Self, MachineError> {
        config.validate()?;
        let Board { registry, pins, display } = board;

        let gate = OperationGate::new(config.gate.scope);
        let timing = config.motor.timing();
        let dwell = Duration::from_millis(config.pusher.dwell_ms);

        let mut lanes = Vec::with_capacity(2);
        for id in GroupId::ALL {
            let group = config
                .group(id)
                .ok_or_else(|| ConfigError::Invalid(format!("group {} missing", id)))?;
            let slide = SlideController::new(group.clone(), Arc::clone(&registry), Arc::clone(&pins), timing)
                .with_interruptible_drive(config.drive.interruptible);
            // Missing devices are only logged here; each motion retries the lookup.
            if slide.resolve_pwm().is_err() {
                tracing::warn!("PWM device {} for group {} not available at boot", group.pwm_device, id);
            }
            let pusher = PusherController::new(group, Arc::clone(&pins), dwell);
            lanes.push(Lane { slide: Arc::new(slide), pusher: Arc::new(pusher) });
        }
        let lanes: [Lane; 2] = lanes
            .try_into()
            .map_err(|_| ConfigError::Invalid("expected exactly two lanes".to_string()))?;

        let keypad = Keypad::new(Arc::clone(&pins), &config.input);
        keypad.configure()?;

        let screen = Arc::new(Screen::new(display));
        let menu = MenuController::new(config.menu_items()?);
        screen.init(menu.items(), menu.cursor());

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&gate),
            lanes,
            Arc::clone(&screen),
            SequenceTiming {
                settle: Duration::from_millis(config.dispatch.settle_ms),
                status_hold: Duration::from_millis(config.dispatch.status_hold_ms),
            },
        ));

        tracing::info!(
            "Dispenser ready: {} menu items, gate scope {:?}",
            menu.items().len(),
            gate.scope()
        );
        Ok(Self {
            config,
            gate,
            dispatcher,
            menu: Arc::new(Mutex::new(menu)),
            screen,
            pins,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gate(&self) -> &Arc<OperationGate> {
        &self.gate
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn screen(&self) -> &Arc<Screen> {
        &self.screen
    }

    /// The input loop, ready to spawn. Stops on `shutdown`.
    pub fn menu_loop(&self) -> MenuLoop {
        MenuLoop::new(
            Arc::clone(&self.menu),
            Keypad::new(Arc::clone(&self.pins), &self.config.input),
            Arc::clone(&self.screen),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.gate),
            self.config.input.poll_interval(),
        )
    }

    /// Spawns the input loop on the current runtime.
    pub fn spawn_menu_loop(&self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        let menu_loop = self.menu_loop();
        tokio::spawn(menu_loop.run(shutdown))
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        let menu = {
            let menu = lock_menu(&self.menu);
            MenuSnapshot {
                cursor: menu.cursor(),
                selected: menu.selected().map(|item| item.label.trim().to_string()),
            }
        };
        let lanes = GroupId::ALL
            .into_iter()
            .map(|id| {
                let lane = self.dispatcher.lane(id);
                LaneSnapshot { group: id, slide: lane.slide.phase(), pusher: lane.pusher.phase() }
            })
            .collect();
        MachineSnapshot { gate: self.gate.snapshot(), menu, lanes }
    }
}
