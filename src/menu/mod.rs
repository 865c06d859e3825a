// src/menu/mod.rs - Product menu: cursor, screen and the input loop
pub mod input;
pub mod screen;

pub use input::{Key, Keypad};
pub use screen::Screen;

use std::sync::{Arc, Mutex, MutexGuard};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::actuator::{DeviceCommand, GroupId};
use crate::dispatcher::Dispatcher;
use crate::hardware::HardwareError;
use crate::motion::OperationGate;

/// One selectable product row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub label: String,
    pub y: u16,
    pub group: GroupId,
    pub command: DeviceCommand,
}

/// Immutable item list plus the cursor. The cursor is clamped, never wraps.
#[derive(Debug)]
pub struct MenuController {
    items: Vec<MenuItem>,
    cursor: usize,
}

impl MenuController {
    pub fn new(items: Vec<MenuItem>) -> Self {
        Self { items, cursor: 0 }
    }

    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selected(&self) -> Option<&MenuItem> {
        self.items.get(self.cursor)
    }

    /// Returns whether the cursor moved.
    pub fn move_up(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn move_down(&mut self) -> bool {
        if self.cursor + 1 >= self.items.len() {
            return false;
        }
        self.cursor += 1;
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MenuSnapshot {
    pub cursor: usize,
    pub selected: Option<String>,
}

pub(crate) fn lock_menu(menu: &Mutex<MenuController>) -> MutexGuard<'_, MenuController> {
    match menu.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The device's main control loop: poll the keys, move the cursor, run the
/// selected product's sequence.
pub struct MenuLoop {
    menu: Arc<Mutex<MenuController>>,
    keypad: Keypad,
    screen: Arc<Screen>,
    dispatcher: Arc<Dispatcher>,
    gate: Arc<OperationGate>,
    poll_interval: Duration,
}

impl MenuLoop {
    pub fn new(
        menu: Arc<Mutex<MenuController>>,
        keypad: Keypad,
        screen: Arc<Screen>,
        dispatcher: Arc<Dispatcher>,
        gate: Arc<OperationGate>,
        poll_interval: Duration,
    ) -> Self {
        Self { menu, keypad, screen, dispatcher, gate, poll_interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Menu loop started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Menu loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!("Keypad error: {}", e);
                    }
                }
            }
        }
    }

    /// One poll of the keypad and its effect.
    pub async fn poll_once(&self) -> Result<Option<Key>, HardwareError> {
        let key = self.keypad.read().await?;
        match key {
            Some(Key::Up) => self.move_cursor(MenuController::move_up),
            Some(Key::Down) => self.move_cursor(MenuController::move_down),
            Some(Key::Select) => self.select().await,
            None => {}
        }
        Ok(key)
    }

    fn move_cursor(&self, step: fn(&mut MenuController) -> bool) {
        let mut menu = lock_menu(&self.menu);
        let previous = menu.cursor();
        if !step(&mut *menu) {
            return;
        }
        let items = menu.items();
        self.screen.draw_row(&items[previous], false);
        self.screen.draw_row(&items[menu.cursor()], true);
    }

    async fn select(&self) {
        let selected = {
            let menu = lock_menu(&self.menu);
            menu.selected().cloned()
        };
        let Some(item) = selected else {
            tracing::warn!("Select pressed with no menu item under the cursor");
            return;
        };
        if !self.gate.is_idle_for(item.group) {
            tracing::debug!("Select ignored, operation in progress");
            return;
        }

        match self.dispatcher.run_selection(&item).await {
            Ok(report) => tracing::info!(
                "{} dispensed in {} ms",
                item.label.trim(),
                report.elapsed().as_millis()
            ),
            Err(e) => tracing::warn!("{} not dispensed: {}", item.label.trim(), e),
        }

        let menu = lock_menu(&self.menu);
        self.screen.init(menu.items(), menu.cursor());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::SlideCommand;

    fn items(n: usize) -> Vec<MenuItem> {
        (0..n)
            .map(|i| MenuItem {
                label: format!("Item {}", i),
                y: 50 + 20 * i as u16,
                group: GroupId::One,
                command: DeviceCommand::slide(GroupId::One, SlideCommand::Exhibit),
            })
            .collect()
    }

    #[test]
    fn test_cursor_clamps_at_both_ends() {
        let mut menu = MenuController::new(items(3));
        assert!(!menu.move_up());
        assert_eq!(menu.cursor(), 0);
        assert!(menu.move_down());
        assert!(menu.move_down());
        assert!(!menu.move_down());
        assert_eq!(menu.cursor(), 2);
        assert_eq!(menu.selected().unwrap().label, "Item 2");
        assert!(menu.move_up());
        assert_eq!(menu.cursor(), 1);
    }

    #[test]
    fn test_empty_menu_has_no_selection() {
        let mut menu = MenuController::new(Vec::new());
        assert!(!menu.move_down());
        assert!(!menu.move_up());
        assert!(menu.selected().is_none());
    }
}
