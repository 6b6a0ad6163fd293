//! tracelore-ingest - tail agent session logs into the database
//!
//! One-shot by default: discovers log files under the root, drains them to
//! quiescence, prints a summary, and exits non-zero if any parse or store
//! errors were counted. With `--watch` it keeps tailing until interrupted.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/tracelore/data.db (~/.local/share/tracelore/data.db)
//! - Logs: $XDG_STATE_HOME/tracelore/tracelore.log (~/.local/state/tracelore/tracelore.log)
//! - Config: $XDG_CONFIG_HOME/tracelore/config.toml (~/.config/tracelore/config.toml)

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracelore_core::ingest::scanner::discover_paths;
use tracelore_core::{Config, EngineStats, IngestConfig, IngestEngine, IngestMode, Store};

#[derive(Parser)]
#[command(name = "tracelore-ingest")]
#[command(about = "Ingest agent session logs into the database")]
#[command(version)]
struct Args {
    /// Root directory containing session logs (overrides config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Glob pattern relative to the root (overrides config)
    #[arg(long)]
    pattern: Option<String>,

    /// Watch mode - keep tailing instead of one-shot
    #[arg(short, long)]
    watch: bool,

    /// Poll interval in milliseconds
    #[arg(long)]
    poll: Option<u64>,

    /// Events per batch before a flush is forced
    #[arg(long)]
    batch_size: Option<usize>,

    /// Milliseconds a partial batch may sit before a flush is forced
    #[arg(long)]
    batch_timeout: Option<u64>,

    /// Tag events with this project when the log line has none
    #[arg(long)]
    project: Option<String>,

    /// Database path (defaults to the XDG data directory)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Verbose output (-v progress summaries in watch mode)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Discover files but don't ingest
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        tracelore_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("tracelore-ingest starting");

    let root = args
        .root
        .clone()
        .or_else(|| config.ingest.root.clone())
        .context("no root directory given (use --root or set ingest.root in config.toml)")?;

    let mut ingest_config = IngestConfig::from_settings(root.clone(), &config.ingest);
    if let Some(pattern) = args.pattern.clone() {
        ingest_config.pattern = pattern;
    }
    if let Some(poll) = args.poll {
        ingest_config.poll_interval = Duration::from_millis(poll);
    }
    if let Some(batch_size) = args.batch_size {
        ingest_config.batch_size = batch_size;
    }
    if let Some(batch_timeout) = args.batch_timeout {
        ingest_config.batch_timeout = Duration::from_millis(batch_timeout);
    }
    if args.project.is_some() {
        ingest_config.project = args.project.clone();
    }
    ingest_config.mode = if args.watch {
        IngestMode::Watch
    } else {
        IngestMode::OneShot
    };

    if args.dry_run {
        let paths = discover_paths(&root, &ingest_config.pattern)?;
        println!(
            "Discovered {} file(s) matching {:?} under {}",
            paths.len(),
            ingest_config.pattern,
            root.display()
        );
        for path in &paths {
            println!("  {}", path.display());
        }
        println!("\nDry run - no ingestion performed");
        tracing::info!("Dry run complete");
        return Ok(());
    }

    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    tracing::info!(path = %db_path.display(), "Opening database");

    let store = Arc::new(Store::open(&db_path).context("failed to open database")?);
    store
        .migrate()
        .context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    let engine = Arc::new(IngestEngine::new(ingest_config, store));
    engine.start().context("failed to start ingestion engine")?;

    // Wire interrupt/terminate to the engine's cancellation token
    let token = engine.shutdown_token();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        token.cancel();
    })
    .context("failed to set Ctrl+C handler")?;

    if args.watch {
        run_watch(&engine, args.verbose);
    } else {
        run_one_shot(&engine);
    }

    let stats = engine.stats();
    print_summary(&stats);

    tracing::info!(
        events = stats.events_processed,
        sessions = stats.sessions_created,
        errors = stats.errors,
        "tracelore-ingest complete"
    );

    if !args.watch && stats.errors > 0 {
        // Everything that could be persisted was, but the run saw errors
        anyhow::bail!("ingestion finished with {} error(s)", stats.errors);
    }

    Ok(())
}

/// One-shot: spinner with live counters while the engine drains itself.
fn run_one_shot(engine: &Arc<IngestEngine>) {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let done = Arc::new(AtomicBool::new(false));
    let progress = {
        let engine = engine.clone();
        let done = done.clone();
        let pb = pb.clone();
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                let stats = engine.stats();
                pb.set_message(format!(
                    "{} events ({} pending, {} errors)",
                    stats.events_processed, stats.events_pending, stats.errors
                ));
                thread::sleep(Duration::from_millis(100));
            }
        })
    };

    engine.wait();
    done.store(true, Ordering::SeqCst);
    let _ = progress.join();
    pb.finish_and_clear();
}

/// Watch mode: block until cancelled, optionally printing periodic progress.
fn run_watch(engine: &Arc<IngestEngine>, verbose: u8) {
    println!("Watch mode active. Press Ctrl+C to stop.");

    let reporter = if verbose >= 1 {
        let engine = engine.clone();
        let token = engine.shutdown_token();
        Some(thread::spawn(move || {
            let mut last_processed = 0u64;
            'outer: loop {
                // Report roughly every 10s, but notice cancellation quickly
                for _ in 0..40 {
                    if token.is_cancelled() {
                        break 'outer;
                    }
                    thread::sleep(Duration::from_millis(250));
                }
                let stats = engine.stats();
                if stats.events_processed != last_processed {
                    last_processed = stats.events_processed;
                    println!(
                        "[{}] {} events from {} files, {} sessions, {} errors",
                        chrono::Local::now().format("%H:%M:%S"),
                        stats.events_processed,
                        stats.files_tracked,
                        stats.sessions_created,
                        stats.errors
                    );
                }
            }
        }))
    } else {
        None
    };

    engine.wait();
    if let Some(handle) = reporter {
        let _ = handle.join();
    }

    println!("Watch mode stopped.");
}

/// Print the final ingestion summary
fn print_summary(stats: &EngineStats) {
    println!("\nIngestion complete:");
    println!("  Files tracked:    {}", stats.files_tracked);
    println!("  Events processed: {}", stats.events_processed);
    println!("  Events pending:   {}", stats.events_pending);
    println!("  Sessions created: {}", stats.sessions_created);
    println!("  Unknown events:   {}", stats.unknown_events);
    println!("  Errors:           {}", stats.errors);
    println!("  Uptime:           {:.1}s", stats.uptime.as_secs_f64());
}
