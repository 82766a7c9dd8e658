mod engine;
mod server;
mod sweeper;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};
use serde::Serialize;
use uuid::Uuid;

use presence_core::{LoopStatus, SystemClock};

use crate::engine::PresenceEngine;
use crate::sweeper::SweepScheduler;

#[derive(Parser)]
#[command(name = "presence", about = "Presence and relationship state engine CLI and MCP server")]
struct Cli {
    /// Database file (default: $PRESENCE_DATA_DIR/presence.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// TOML config file (default: $PRESENCE_CONFIG, else built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start MCP server on stdio transport
    Serve {
        /// Seconds between background sweeps (default from config)
        #[arg(long)]
        sweep_interval: Option<u64>,
    },

    /// Apply one turn of intent analyzer output
    Turn {
        user: String,
        persona: String,
        /// Turn signals as JSON; `-` reads stdin
        signals: String,
    },

    /// Show what would be raised proactively right now
    Surface { user: String, persona: String },

    /// Mark a surfaced loop or thread as used
    MarkSurfaced { id: String },

    /// Resolve an open loop
    Resolve { id: String },

    /// Show relationship state
    State { user: String, persona: String },

    /// Show a relationship's scored events, newest first
    Events {
        user: String,
        persona: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List a user's loops
    Loops {
        user: String,
        /// Include resolved, dismissed and expired loops
        #[arg(long)]
        all: bool,
    },

    /// Manage a persona's ongoing threads
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },

    /// Run one maintenance sweep
    Sweep,

    /// Export state to a JSON file
    Export {
        /// Output file path
        path: PathBuf,
    },

    /// Import state from a JSON file
    Import {
        /// Input file path
        path: PathBuf,
    },

    /// Show row counts
    Stats,
}

#[derive(Subcommand)]
enum ThreadAction {
    /// Add a thread
    Add {
        persona: String,
        user: String,
        topic: String,
        #[arg(long, default_value_t = 0.6)]
        intensity: f64,
        #[arg(long)]
        user_related: bool,
    },
    /// List active threads
    List { persona: String, user: String },
    /// Retire a thread
    Retire { id: String },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn open_engine(cli: &Cli) -> Result<PresenceEngine> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("PRESENCE_CONFIG").map(PathBuf::from));
    let config = presence_store::load_config(config_path.as_deref()).context("failed to load config")?;
    let db = cli.db.clone().unwrap_or_else(presence_store::default_db_path);
    PresenceEngine::open(&db, config, Arc::new(SystemClock))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("failed to serialize output")?);
    Ok(())
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).with_context(|| format!("invalid id '{raw}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let engine = open_engine(&cli)?;

    match &cli.command {
        Commands::Serve { sweep_interval } => cmd_serve(engine, *sweep_interval).await,
        Commands::Turn {
            user,
            persona,
            signals,
        } => cmd_turn(&engine, user, persona, signals).await,
        Commands::Surface { user, persona } => print_json(&engine.surface(user, persona).await),
        Commands::MarkSurfaced { id } => {
            let id = parse_id(id)?;
            print_json(&serde_json::json!({ "id": id, "marked": engine.mark_surfaced(id).await }))
        }
        Commands::Resolve { id } => {
            let id = parse_id(id)?;
            print_json(&serde_json::json!({ "id": id, "resolved": engine.resolve_loop(id).await }))
        }
        Commands::State { user, persona } => print_json(&engine.state(user, persona).await),
        Commands::Events { user, persona, limit } => {
            let events = engine
                .events(user, persona, *limit)
                .await
                .context("failed to read events")?;
            print_json(&events)
        }
        Commands::Loops { user, all } => {
            let statuses = if *all {
                LoopStatus::ALL.to_vec()
            } else {
                LoopStatus::OPEN.to_vec()
            };
            print_json(&engine.loops(user, statuses).await)
        }
        Commands::Thread { action } => cmd_thread(&engine, action).await,
        Commands::Sweep => print_json(&engine.sweep().await),
        Commands::Export { path } => cmd_export(&engine, path).await,
        Commands::Import { path } => cmd_import(&engine, path).await,
        Commands::Stats => cmd_stats(&engine).await,
    }
}

async fn cmd_serve(engine: PresenceEngine, sweep_interval: Option<u64>) -> Result<()> {
    tracing::info!("starting MCP server on {}", engine.db_path().display());
    let every = sweep_interval.unwrap_or(engine.config().sweep.interval_secs).max(1);
    let scheduler = SweepScheduler::start(engine.clone(), Duration::from_secs(every));

    let service = server::PresenceServer::new(engine)
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;
    let result = service.waiting().await;

    tracing::debug!(running = scheduler.is_running(), "stopping sweep scheduler");
    scheduler.stop().await;
    result?;
    Ok(())
}

async fn cmd_turn(engine: &PresenceEngine, user: &str, persona: &str, signals: &str) -> Result<()> {
    let raw = if signals == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read signals from stdin")?;
        buf
    } else {
        signals.to_string()
    };
    // Unparseable input is "no signal this turn", same as a bad field.
    let value = serde_json::from_str(&raw).unwrap_or_else(|e| {
        tracing::warn!("turn signals are not JSON: {e}");
        serde_json::Value::String(raw.clone())
    });
    let outcome = engine.process_turn_json(user, persona, &value).await;
    print_json(&outcome)
}

async fn cmd_thread(engine: &PresenceEngine, action: &ThreadAction) -> Result<()> {
    match action {
        ThreadAction::Add {
            persona,
            user,
            topic,
            intensity,
            user_related,
        } => {
            if topic.trim().is_empty() {
                bail!("topic must not be empty");
            }
            let thread = engine
                .add_thread(persona, user, topic, *intensity, *user_related)
                .await
                .context("failed to add thread")?;
            print_json(&thread)
        }
        ThreadAction::List { persona, user } => {
            print_json(&engine.threads(persona, user).await.context("failed to list threads")?)
        }
        ThreadAction::Retire { id } => {
            let id = parse_id(id)?;
            let retired = engine.retire_thread(id).await.context("failed to retire thread")?;
            print_json(&serde_json::json!({ "id": id, "retired": retired }))
        }
    }
}

async fn cmd_export(engine: &PresenceEngine, path: &Path) -> Result<()> {
    let json = engine.export_json().await.context("failed to export state")?;
    std::fs::write(path, &json).with_context(|| format!("failed to write {}", path.display()))?;
    println!("exported to {}", path.display());
    Ok(())
}

async fn cmd_import(engine: &PresenceEngine, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let report = engine.import_json(json).await.context("failed to import JSON")?;
    println!(
        "imported from {}. upserted={}, deleted={}",
        path.display(),
        report.upserted,
        report.deleted
    );
    Ok(())
}

async fn cmd_stats(engine: &PresenceEngine) -> Result<()> {
    let stats = engine.stats().await.context("failed to read stats")?;
    println!("db:              {}", engine.db_path().display());
    println!("open_loops:      {}", stats.open_loops);
    println!("terminal_loops:  {}", stats.terminal_loops);
    println!("relationships:   {}", stats.relationships);
    println!("events:          {}", stats.events);
    println!("insights:        {}", stats.insights);
    println!("active_threads:  {}", stats.active_threads);
    Ok(())
}
