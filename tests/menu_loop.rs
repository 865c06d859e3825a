// Integration tests for the keypad-driven menu loop

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use tokio::sync::broadcast;
    use tokio::time::{sleep, Duration};
    use tokio_test::assert_ok;

    use vend_rs::hardware::sim::{HwEvent, SimBoard};
    use vend_rs::hardware::{Pin, RED, WHITE};
    use vend_rs::menu::screen::{HELP, STATUS_Y};
    use vend_rs::{CommandAck, Config, Machine};

    const UP: Pin = Pin::new('C', 5);
    const DOWN: Pin = Pin::new('C', 1);
    const SELECT: Pin = Pin::new('C', 3);

    // One poll interval plus the debounce delay: seen by exactly one poll.
    const PRESS: Duration = Duration::from_millis(120);

    fn setup() -> (SimBoard, Arc<Machine>, broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
        let sim = SimBoard::new();
        let machine = Arc::new(Machine::new(Config::default(), sim.board()).unwrap());
        let (shutdown_tx, _) = broadcast::channel(1);
        let task = machine.spawn_menu_loop(shutdown_tx.subscribe());
        (sim, machine, shutdown_tx, task)
    }

    async fn press(sim: &SimBoard, pin: Pin) {
        sim.press(pin, PRESS);
        sleep(Duration::from_millis(250)).await;
    }

    fn slide_enables(sim: &SimBoard, channel: u8) -> usize {
        sim.events()
            .iter()
            .filter(|r| matches!(r.event, HwEvent::PwmEnable { channel: c, .. } if c == channel))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_move_cursor_with_clamping() {
        let (sim, machine, shutdown_tx, task) = setup();

        press(&sim, UP).await;
        assert_eq!(machine.snapshot().menu.cursor, 0);

        for _ in 0..8 {
            press(&sim, DOWN).await;
        }
        assert_eq!(machine.snapshot().menu.cursor, 5);
        assert_eq!(sim.text_color_at(160), Some(RED));
        assert_eq!(sim.text_color_at(140), Some(WHITE));
        assert_eq!(sim.text_color_at(50), Some(WHITE));

        press(&sim, UP).await;
        assert_eq!(machine.snapshot().menu.cursor, 4);
        assert_eq!(sim.text_color_at(140), Some(RED));
        assert_eq!(sim.text_color_at(160), Some(WHITE));

        let _ = shutdown_tx.send(());
        assert_ok!(task.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_runs_sequence_and_redraws() {
        let (sim, machine, shutdown_tx, task) = setup();

        press(&sim, DOWN).await;
        assert_eq!(machine.snapshot().menu.selected.as_deref(), Some("Fresh:3.50"));
        sim.clear_events();

        press(&sim, SELECT).await;
        assert!(!machine.gate().is_idle());
        assert_eq!(sim.text_at(STATUS_Y).as_deref(), Some("Processing..."));

        // OUT1_1 drive, settle, push round trip, status hold
        sleep(Duration::from_millis(34_020 + 2_000 + 11_000 + 2_000 + 500)).await;
        assert!(machine.gate().is_idle());
        assert_eq!(slide_enables(&sim, 4), 1);
        assert_eq!(sim.text_at(STATUS_Y).as_deref(), Some(HELP));
        assert_eq!(sim.text_color_at(70), Some(RED));

        let _ = shutdown_tx.send(());
        assert_ok!(task.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_is_ignored_while_busy() {
        let (sim, machine, shutdown_tx, task) = setup();

        let handle = match assert_ok!(machine.dispatcher().execute_named("ENDPOINT_2")) {
            CommandAck::Started(handle) => handle,
            CommandAck::Stopped { .. } => panic!("ENDPOINT_2 should start"),
        };
        press(&sim, SELECT).await;
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(slide_enables(&sim, 4), 0);
        assert_eq!(sim.text_at(STATUS_Y).as_deref(), Some(HELP));

        assert_ok!(handle.wait().await);
        let _ = shutdown_tx.send(());
        assert_ok!(task.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_stops_on_shutdown() {
        let (_sim, _machine, shutdown_tx, task) = setup();
        sleep(Duration::from_millis(350)).await;
        let _ = shutdown_tx.send(());
        assert_ok!(task.await);
    }
}
