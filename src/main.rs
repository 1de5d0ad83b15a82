//! proxlock CLI
//!
//! Usage:
//!   proxlock replay --config links.json < events.jsonl   # Replay recorded radio events
//!   proxlock serve --config links.json                   # HTTP API server
//!   proxlock replay --json < events.jsonl                # JSON output

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxlock::config::AppConfig;
use proxlock::core::{
    run_server, Clock, CommandLock, Engine, EngineHandle, LockAction, LogOnlyLock, LoggingAdapter, ManualClock,
    PresenceCore, SystemClock,
};
use proxlock::error::LockError;
use proxlock::types::{LinkTransition, RadioEvent, Timestamp};
use proxlock::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "proxlock",
    version = VERSION,
    about = "Proximity presence engine - lock when your device walks away",
    long_about = "proxlock watches the signal strength of paired peripherals, smooths it,\n\
                  estimates their distance and decides per link whether you are present.\n\n\
                  Commands:\n  \
                  replay  Feed recorded radio events (JSON lines) from stdin\n  \
                  serve   HTTP API server, radio events arrive over POST /radio/events\n\n\
                  States:\n  \
                  LINKED   - Device near enough (and connected, when required)\n  \
                  UNLINKED - Device gone, too far, idle or disconnected; triggers the lock"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output transitions as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colors in output
    #[arg(long, global = true)]
    no_color: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay radio events from stdin against a manual clock
    Replay,

    /// Run the engine behind the HTTP API
    Serve {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: String,
    },
}

/// One line of a replay file: a radio event, or a bare clock tick that
/// advances time and sweeps
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Tick { tick: Timestamp },
    Event(RadioEvent),
}

impl ReplayLine {
    fn timestamp(&self) -> Option<Timestamp> {
        match self {
            ReplayLine::Tick { tick } => Some(*tick),
            ReplayLine::Event(RadioEvent::Discovered(discovery)) => Some(discovery.at),
            ReplayLine::Event(_) => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.no_color);
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load(path),
        None => Ok(AppConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Configuration error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let result = match &cli.command {
        Command::Replay => run_replay(&cli, &config).await,
        Command::Serve { addr } => run_serve(&cli, &config, addr).await,
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool, no_color: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(!no_color),
        )
        .init();
}

fn lock_action(config: &AppConfig) -> Result<Arc<dyn LockAction>, LockError> {
    match &config.lock.command {
        Some(argv) => Ok(Arc::new(CommandLock::new(argv.clone())?)),
        None => Ok(Arc::new(LogOnlyLock)),
    }
}

/// Start the engine and register every configured link
async fn start_engine(
    config: &AppConfig,
    clock: Arc<dyn Clock>,
) -> Result<(EngineHandle, JoinHandle<()>), Box<dyn std::error::Error>> {
    let (engine, task) = Engine::new(PresenceCore::from_config(config), Arc::new(LoggingAdapter::new()), clock)
        .with_lock(lock_action(config)?)
        .with_sweep_interval(config.sweep_interval())
        .spawn();

    for (link, link_config) in config.effective_links() {
        engine.configure_link(link, link_config).await?;
    }
    Ok((engine, task))
}

/// Print transitions until the engine stops
fn spawn_printer(mut rx: broadcast::Receiver<LinkTransition>, json: bool, no_color: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(transition) => print_transition(&transition, json, no_color),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "transition output lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_transition(transition: &LinkTransition, json: bool, no_color: bool) {
    if json {
        match serde_json::to_string(transition) {
            Ok(line) => println!("{}", line),
            Err(e) => error!(error = %e, "failed to encode transition"),
        }
    } else if no_color {
        println!("{}", transition.to_parseable_string());
    } else {
        println!("{}", transition.to_terminal_string());
        if transition.is_unlink() {
            println!("{}", format!("  └─ {}", transition.reason.description()).bright_black());
        }
    }
}

/// Replay recorded events against a manual clock
async fn run_replay(cli: &Cli, config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = Vec::new();
    for (number, line) in io::stdin().lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ReplayLine>(&line) {
            Ok(parsed) => lines.push(parsed),
            Err(e) => warn!(line = number + 1, error = %e, "skipping unreadable replay line"),
        }
    }

    let Some(start) = lines.iter().find_map(ReplayLine::timestamp) else {
        warn!("nothing to replay: no timestamped events");
        return Ok(());
    };
    let clock = ManualClock::new(start);

    let (engine, task) = start_engine(config, Arc::new(clock.clone())).await?;
    let printer = spawn_printer(engine.subscribe_transitions().await?, cli.json, cli.no_color);

    for line in lines {
        if let Some(at) = line.timestamp() {
            clock.advance_to(at);
        }
        match line {
            ReplayLine::Tick { .. } => engine.sweep().await?,
            ReplayLine::Event(event) => {
                engine.radio_event(event)?;
                engine.barrier().await?;
            }
        }
    }
    engine.sweep().await?;
    let statuses = engine.links().await?;

    engine.shutdown();
    task.await?;
    printer.await?;

    if !cli.json {
        for status in statuses {
            let line = format!(
                "{}: {} ({}, {} samples)",
                status.link,
                status.state,
                status.reason.code(),
                status.samples
            );
            if status.state.is_linked() {
                println!("{}", line.green());
            } else {
                println!("{}", line.red());
            }
        }
    }
    Ok(())
}

/// Run HTTP API server
async fn run_serve(cli: &Cli, config: &AppConfig, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !cli.json {
        println!();
        println!("{}", format!("proxlock v{} - presence engine", VERSION).bold());
        println!("  GET    /health                 - Health check");
        println!("  GET    /devices                - Visible peripherals");
        println!("  GET    /links                  - Link status");
        println!("  PUT    /links/:id              - Configure link");
        println!("  DELETE /links/:id              - Remove link");
        println!("  GET    /links/:id/history      - Sample history");
        println!("  POST   /links/:id/evaluate     - Evaluate now");
        println!("  POST   /radio/events           - Radio callbacks");
        println!("  WS     /ws/transitions         - Live transitions");
        println!("  WS     /ws/devices             - Device updates");
        println!();
    }

    let (engine, _task) = start_engine(config, Arc::new(SystemClock)).await?;
    let _printer = spawn_printer(engine.subscribe_transitions().await?, cli.json, cli.no_color);
    run_server(addr, engine).await
}
