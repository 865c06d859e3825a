// src/menu/screen.rs - Menu layout on the device LCD
use std::sync::{Mutex, MutexGuard};

use super::MenuItem;
use crate::hardware::{Display, BLACK, RED, WHITE};

pub const TITLE: &str = "Vending Machine";
pub const HELP: &str = "Use Up/Down to select, Select to buy";
pub const STATUS_PROCESSING: &str = "Processing...      ";
pub const STATUS_COMPLETE: &str = "Operation complete ";
pub const STATUS_FAILED: &str = "Operation failed   ";

pub const STATUS_Y: u16 = 260;
pub const PANEL_HEIGHT: u16 = 320;
/// A row reaches this far below its `y`, selection box included.
pub const ROW_EXTENT: u16 = 18;
const STATUS_BLANK: &str = "                ";
const ROW_HEIGHT: u16 = 16;
const LEFT: u16 = 10;
const RIGHT: u16 = 230;

/// Serializes all drawing so the menu loop and the dispatcher never
/// interleave partial rows on the panel.
pub struct Screen {
    display: Mutex<Box<dyn Display>>,
}

impl Screen {
    pub fn new(display: Box<dyn Display>) -> Self {
        Self { display: Mutex::new(display) }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Display>> {
        match self.display.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Full redraw: title, separator, every row, help line.
    pub fn init(&self, items: &[MenuItem], cursor: usize) {
        let mut lcd = self.lock();
        lcd.clear(BLACK);
        lcd.set_color(WHITE, BLACK);
        lcd.show_string(LEFT, 10, 24, TITLE);
        lcd.draw_line(0, 40, 240, 40);
        for (idx, item) in items.iter().enumerate() {
            paint_row(&mut **lcd, item, idx == cursor);
        }
        lcd.set_color(WHITE, BLACK);
        lcd.show_string(LEFT, STATUS_Y, 16, HELP);
    }

    pub fn draw_row(&self, item: &MenuItem, selected: bool) {
        let mut lcd = self.lock();
        paint_row(&mut **lcd, item, selected);
    }

    pub fn show_status(&self, status: &str) {
        let mut lcd = self.lock();
        lcd.set_color(WHITE, BLACK);
        lcd.show_string(LEFT, STATUS_Y, 16, STATUS_BLANK);
        lcd.show_string(LEFT, STATUS_Y, 16, status);
    }
}

fn paint_row(lcd: &mut dyn Display, item: &MenuItem, selected: bool) {
    let y = item.y;

    lcd.set_color(BLACK, BLACK);
    for i in 0..ROW_HEIGHT {
        lcd.draw_line(LEFT, y.saturating_add(i), RIGHT, y.saturating_add(i));
    }

    if selected {
        let top = y.saturating_sub(2);
        let bottom = y.saturating_add(ROW_EXTENT);
        lcd.set_color(RED, BLACK);
        lcd.draw_line(LEFT, top, RIGHT, top);
        lcd.draw_line(LEFT, bottom, RIGHT, bottom);
        lcd.draw_line(LEFT, top, LEFT, bottom);
        lcd.draw_line(RIGHT, top, RIGHT, bottom);
    }

    lcd.set_color(if selected { RED } else { WHITE }, BLACK);
    lcd.show_string(LEFT, y, 16, &item.label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{DeviceCommand, GroupId, SlideCommand};
    use crate::hardware::sim::{DrawOp, SimBoard};

    fn item(label: &str, y: u16) -> MenuItem {
        MenuItem {
            label: label.to_string(),
            y,
            group: GroupId::One,
            command: DeviceCommand::slide(GroupId::One, SlideCommand::Exhibit),
        }
    }

    #[test]
    fn test_init_layout() {
        let sim = SimBoard::new();
        let screen = Screen::new(sim.board().display);
        screen.init(&[item("Snickers", 50), item("Fresh:3.50  ", 70)], 0);

        let ops = sim.draw_ops();
        assert_eq!(ops[0], DrawOp::Clear(BLACK));
        assert_eq!(sim.text_at(10).as_deref(), Some(TITLE));
        assert_eq!(sim.text_at(STATUS_Y).as_deref(), Some(HELP));
        assert_eq!(sim.text_color_at(50), Some(RED));
        assert_eq!(sim.text_color_at(70), Some(WHITE));
        assert!(ops.contains(&DrawOp::Line { x1: 0, y1: 40, x2: 240, y2: 40, color: WHITE }));
        // Selection box around the first row only
        assert!(ops.contains(&DrawOp::Line { x1: 10, y1: 48, x2: 230, y2: 48, color: RED }));
        assert!(!ops.contains(&DrawOp::Line { x1: 10, y1: 68, x2: 230, y2: 68, color: RED }));
    }

    #[test]
    fn test_row_is_cleared_before_redraw() {
        let sim = SimBoard::new();
        let screen = Screen::new(sim.board().display);
        screen.draw_row(&item("Snickers", 50), false);

        let ops = sim.draw_ops();
        let clears = ops
            .iter()
            .filter(|op| matches!(op, DrawOp::Line { color: BLACK, x1: 10, x2: 230, .. }))
            .count();
        assert_eq!(clears, 16);
        assert!(matches!(ops.last(), Some(DrawOp::Text { y: 50, color: WHITE, .. })));
    }

    #[test]
    fn test_row_near_coordinate_limit_does_not_overflow() {
        let sim = SimBoard::new();
        let screen = Screen::new(sim.board().display);
        screen.draw_row(&item("Edge", u16::MAX - 4), true);
        assert!(sim
            .draw_ops()
            .contains(&DrawOp::Line { x1: 10, y1: u16::MAX, x2: 230, y2: u16::MAX, color: RED }));
    }

    #[test]
    fn test_status_is_blanked_first() {
        let sim = SimBoard::new();
        let screen = Screen::new(sim.board().display);
        screen.show_status(STATUS_PROCESSING);

        let texts: Vec<String> = sim
            .draw_ops()
            .into_iter()
            .filter_map(|op| match op {
                DrawOp::Text { y: STATUS_Y, text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec![STATUS_BLANK.to_string(), STATUS_PROCESSING.to_string()]);
        assert_eq!(sim.text_at(STATUS_Y).as_deref(), Some("Processing..."));
    }
}
