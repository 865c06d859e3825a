// src/main.rs - Host runner for the dispenser core on the simulated board
use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::sync::broadcast;

use vend_rs::console::Console;
use vend_rs::hardware::sim::SimBoard;
use vend_rs::{load_config, CommandAck, Config, DeviceCommand, Machine};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(name = "vend-host", version, about = "Two-lane vending dispenser motion core")]
struct Cli {
    /// Configuration file; built-in defaults are used when it does not exist
    #[arg(short, long, default_value = "vend.toml")]
    config: String,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the menu loop and an operator console on stdin
    Run,
    /// Run one device command to completion, e.g. `exec OUT1_2`
    Exec { name: String },
    /// List every device command
    Commands,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    if let Command::Commands = cli.command {
        for command in DeviceCommand::all() {
            println!("{:<14}- {}", command.to_string(), command.help());
        }
        return Ok(());
    }

    let config = if Path::new(&cli.config).exists() {
        tracing::info!("Loading configuration from: {}", cli.config);
        load_config(&cli.config).map_err(|e| {
            tracing::error!("Failed to load config from '{}': {}", cli.config, e);
            Box::new(e) as BoxError
        })?
    } else {
        tracing::info!("No config at '{}', using built-in defaults", cli.config);
        Config::default()
    };

    let sim = SimBoard::new();
    let machine = Arc::new(Machine::new(config, sim.board())?);

    match cli.command {
        Command::Exec { name } => exec(&machine, &name).await,
        Command::Run => run(machine, sim).await,
        Command::Commands => Ok(()),
    }
}

async fn exec(machine: &Machine, name: &str) -> Result<(), BoxError> {
    match machine.dispatcher().execute_named(name)? {
        CommandAck::Started(handle) => {
            let report = handle.wait().await?;
            println!(
                "{} finished: {:?} after {} ms",
                report.command,
                report.outcome,
                report.elapsed().as_millis()
            );
        }
        CommandAck::Stopped { gate_released } => {
            println!("{} stopped (gate released: {})", name.to_ascii_uppercase(), gate_released);
        }
    }
    Ok(())
}

async fn run(machine: Arc<Machine>, sim: SimBoard) -> Result<(), BoxError> {
    let (shutdown_tx, _) = broadcast::channel(1);
    let menu_task = machine.spawn_menu_loop(shutdown_tx.subscribe());

    let mut console = Console::new(Arc::clone(&machine), tokio::io::stdout()).with_keys(sim);
    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = console.run(stdin, shutdown_tx.subscribe()) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(());
    menu_task.await?;
    Ok(())
}
