// src/lib.rs

pub mod actions;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod session;
pub mod types;
pub mod watch;
pub mod workflow;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::actions::{ActionResources, BuilderRegistry};
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::engine::{Runtime, RuntimeEvent, RuntimeOptions, TriggerDispatcher};
use crate::session::{spawn_replay, EventBus, MemorySession, ReplaySource};
use crate::workflow::ActionSpec;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - workflow file loading
/// - event bus + in-memory session
/// - dispatcher and runtime loop
/// - event replay from a file or stdin
/// - (optional) workflow file watcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let bus = EventBus::new();
    let session = Arc::new(MemorySession::new(bus.clone()));
    let resources = ActionResources {
        io: tokio::runtime::Handle::current(),
        session: session.clone(),
        bus: bus.clone(),
    };

    // Runtime control channel.
    let (rt_tx, rt_rx) = mpsc::unbounded_channel::<RuntimeEvent>();

    let registry = Arc::new(BuilderRegistry::with_builtins());
    debug!(builders = ?registry.names().collect::<Vec<_>>(), "registered action builders");

    let dispatcher = TriggerDispatcher::new(cfg.workflows, registry, resources, cfg.options, rt_tx.clone());

    let options = RuntimeOptions {
        exit_when_idle: args.once,
    };
    // Subscribes before the replay starts publishing.
    let runtime = Runtime::new(dispatcher, rt_rx, bus.clone(), options);

    // Optional workflow file watcher (disabled in --once mode).
    let _watcher_handle = if args.watch_config && !args.once {
        Some(crate::watch::spawn_config_watcher(&config_path, rt_tx.clone())?)
    } else {
        None
    };

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested);
        });
    }

    let source = ReplaySource::from_arg(&args.events);
    info!(?source, "replaying session events");
    let _replay = spawn_replay(source, session, bus, rt_tx);

    let stats = runtime.run().await?;
    info!(
        events = stats.events,
        matched = stats.runs_matched,
        completed = stats.runs_completed,
        halted = stats.runs_halted,
        dropped = stats.runs_dropped,
        "seedflow finished"
    );
    Ok(())
}

/// Simple dry-run output: print limits and workflows.
fn print_dry_run(cfg: &ConfigFile) {
    println!("seedflow dry-run");
    println!(
        "  config.max_active_runners = {}",
        cfg.options
            .max_active_runners
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );
    println!("  config.pending_queue_length = {}", cfg.options.pending_queue_length);
    println!("  config.overflow_behaviour = {:?}", cfg.options.overflow);
    if let Some(timeout) = cfg.options.runner.action_timeout {
        println!("  config.action_timeout = {timeout:?}");
    }
    println!();

    println!("workflows ({}):", cfg.workflows.len());
    for wf in cfg.workflows.iter() {
        let kinds: Vec<_> = wf.trigger().kinds().map(|k| k.as_str()).collect();
        println!("  - {}", wf.name());
        println!("      on: {}", kinds.join(", "));
        if let Some(filter) = wf.filter() {
            println!("      filter: {}", filter.describe());
        }
        for (index, action) in wf.actions().iter().enumerate() {
            match action {
                ActionSpec::Builtin { builder, params } => {
                    println!("      {index}: {builder} {params}");
                }
                ActionSpec::Callable(_) => println!("      {index}: <callable>"),
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
