// src/console.rs - Line-oriented operator console (msh style)
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;

use crate::actuator::DeviceCommand;
use crate::dispatcher::{CommandAck, DispatchError};
use crate::hardware::sim::SimBoard;
use crate::machine::Machine;
use crate::menu::Key;
use crate::motion::MotionHandle;

pub const PROMPT: &str = "msh > ";

pub struct Console<W> {
    machine: Arc<Machine>,
    out: W,
    keys: Option<SimBoard>,
    last: Option<MotionHandle>,
}

impl<W: AsyncWrite + Unpin> Console<W> {
    pub fn new(machine: Arc<Machine>, out: W) -> Self {
        Self { machine, out, keys: None, last: None }
    }

    /// Enables the `key` command by pressing inputs on a simulated board.
    pub fn with_keys(mut self, sim: SimBoard) -> Self {
        self.keys = Some(sim);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Reads commands until `quit`, end of input, or shutdown.
    pub async fn run<R>(&mut self, input: R, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            self.write(PROMPT).await?;
            let line = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Console shutting down");
                    break;
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            if !self.handle_line(&line).await? {
                break;
            }
        }
        self.out.flush().await
    }

    /// Handles one console line. Returns `false` when the console should stop.
    pub async fn handle_line(&mut self, line: &str) -> std::io::Result<bool> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Ok(true);
        };
        match word {
            "quit" => return Ok(false),
            "help" => self.help().await?,
            "status" => self.status().await?,
            "wait" => self.wait().await?,
            "key" => self.key(words.next()).await?,
            name => self.command(name).await?,
        }
        Ok(true)
    }

    async fn write(&mut self, text: &str) -> std::io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.flush().await
    }

    async fn writeln(&mut self, text: &str) -> std::io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await
    }

    async fn help(&mut self) -> std::io::Result<()> {
        self.writeln("Command list:").await?;
        for command in DeviceCommand::all() {
            self.writeln(&format!("{:<14}- {}", command.to_string(), command.help())).await?;
        }
        self.writeln(&format!("{:<14}- {}", "status", "show gate and lane state")).await?;
        self.writeln(&format!("{:<14}- {}", "wait", "wait for the last started motion")).await?;
        self.writeln(&format!("{:<14}- {}", "key", "press up, down or select")).await?;
        self.writeln(&format!("{:<14}- {}", "quit", "leave the console")).await
    }

    async fn status(&mut self) -> std::io::Result<()> {
        let snapshot = self.machine.snapshot();
        let json = serde_json::to_string_pretty(&snapshot).map_err(std::io::Error::other)?;
        self.writeln(&json).await
    }

    async fn wait(&mut self) -> std::io::Result<()> {
        let Some(handle) = self.last.take() else {
            return self.writeln("no motion started").await;
        };
        let target = handle.target();
        let line = match handle.wait().await {
            Ok(report) => format!(
                "{} finished: {:?} after {} ms",
                report.command,
                report.outcome,
                report.elapsed().as_millis()
            ),
            Err(e) => format!("{} failed: {}", target, e),
        };
        self.writeln(&line).await
    }

    async fn key(&mut self, name: Option<&str>) -> std::io::Result<()> {
        let key = match name {
            Some("up") => Key::Up,
            Some("down") => Key::Down,
            Some("select") => Key::Select,
            _ => return self.writeln("usage: key up|down|select").await,
        };
        let Some(sim) = &self.keys else {
            return self.writeln("key: no simulated keypad on this board").await;
        };
        let input = &self.machine.config().input;
        let pin = match key {
            Key::Up => input.up_pin,
            Key::Down => input.down_pin,
            Key::Select => input.select_pin,
        };
        // Long enough for exactly one debounced poll to see it.
        sim.press(pin, input.poll_interval() + input.debounce());
        self.writeln(&format!("key {:?} pressed", key)).await
    }

    async fn command(&mut self, name: &str) -> std::io::Result<()> {
        let line = match self.machine.dispatcher().execute_named(name) {
            Ok(CommandAck::Started(handle)) => {
                let line = format!("{} started", name.to_ascii_uppercase());
                self.last = Some(handle);
                line
            }
            Ok(CommandAck::Stopped { gate_released }) => format!(
                "{} stopped{}",
                name.to_ascii_uppercase(),
                if gate_released { ", gate released" } else { "" }
            ),
            Err(DispatchError::UnknownCommand(_)) => format!("{}: command not found.", name),
            Err(DispatchError::Busy(busy)) => format!("{}: {}", name.to_ascii_uppercase(), busy),
            Err(e) => format!("{} failed: {}", name.to_ascii_uppercase(), e),
        };
        self.writeln(&line).await
    }
}
