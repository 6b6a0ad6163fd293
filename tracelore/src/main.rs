//! tracelore - query and export aggregate agent execution statistics
//!
//! Reads the database populated by `tracelore-ingest` and prints ranked
//! statistics tables, exports the full metrics bundle, or records task
//! executions directly.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/tracelore/data.db (~/.local/share/tracelore/data.db)
//! - Logs: $XDG_STATE_HOME/tracelore/tracelore.log (~/.local/state/tracelore/tracelore.log)
//! - Config: $XDG_CONFIG_HOME/tracelore/config.toml (~/.config/tracelore/config.toml)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use tracelore_core::format::{format_duration_ms, format_rate, format_relative_time};
use tracelore_core::{Config, ExportFormat, MetricsBundle, NewTaskExecution, Store};

#[derive(Parser)]
#[command(name = "tracelore")]
#[command(about = "Query and export agent execution statistics")]
#[command(version)]
struct Cli {
    /// Database path (defaults to the XDG data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Filters shared by the ranked statistics tables.
#[derive(Args)]
struct Scope {
    /// Restrict to one project
    #[arg(long)]
    project: Option<String>,

    /// Maximum rows to show (0 = all)
    #[arg(long, default_value_t = 20)]
    limit: i64,

    /// Rows to skip
    #[arg(long, default_value_t = 0)]
    offset: i64,
}

#[derive(Subcommand)]
enum Command {
    /// Show aggregate statistics tables
    Stats {
        #[command(subcommand)]
        table: StatsTable,
    },

    /// Export the metrics bundle as json, markdown, or csv
    Export {
        /// Output format: json, markdown/md, or csv
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,

        /// Maximum rows per ranked table (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },

    /// Record one task execution
    Record {
        #[arg(long)]
        plan_file: String,
        #[arg(long)]
        run_number: i64,
        #[arg(long)]
        task_number: i64,
        #[arg(long)]
        task_name: String,
        #[arg(long)]
        agent: String,
        #[arg(long)]
        prompt: Option<String>,
        /// Mark the execution as failed (successful by default)
        #[arg(long)]
        failed: bool,
        #[arg(long)]
        output: Option<String>,
        #[arg(long)]
        error_message: Option<String>,
        #[arg(long, default_value_t = 0.0)]
        duration_seconds: f64,
        #[arg(long)]
        project: Option<String>,
    },
}

#[derive(Subcommand)]
enum StatsTable {
    /// Project-wide summary
    Summary {
        /// Restrict to one project
        #[arg(long)]
        project: Option<String>,
    },
    /// Tool invocation outcomes
    Tools {
        #[command(flatten)]
        scope: Scope,
    },
    /// Bash command outcomes
    Bash {
        #[command(flatten)]
        scope: Scope,
    },
    /// File operation outcomes
    Files {
        #[command(flatten)]
        scope: Scope,
    },
    /// Collapsed error patterns
    Errors {
        #[command(flatten)]
        scope: Scope,
    },
    /// Per-agent task performance
    Agents {
        #[command(flatten)]
        scope: Scope,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    Config::ensure_xdg_env();
    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        tracelore_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = cli.db.clone().unwrap_or_else(Config::database_path);
    let store = Store::open(&db_path).context("failed to open database")?;
    store.migrate().context("failed to run database migrations")?;

    match cli.command {
        Command::Stats { table } => run_stats(&store, table),
        Command::Export {
            format,
            output,
            project,
            limit,
        } => run_export(&store, &format, output, project.as_deref(), limit),
        Command::Record {
            plan_file,
            run_number,
            task_number,
            task_name,
            agent,
            prompt,
            failed,
            output,
            error_message,
            duration_seconds,
            project,
        } => {
            let id = store
                .record_execution(&NewTaskExecution {
                    plan_file,
                    run_number,
                    task_number,
                    task_name,
                    agent,
                    prompt,
                    success: !failed,
                    output,
                    error_message,
                    duration_seconds,
                    project,
                    created_at: None,
                })
                .context("failed to record execution")?;
            println!("Recorded execution #{}", id);
            Ok(())
        }
    }
}

fn run_stats(store: &Store, table: StatsTable) -> Result<()> {
    match table {
        StatsTable::Summary { project } => {
            let s = store.summary_stats(project.as_deref())?;
            println!("Summary{}:", scope_suffix(project.as_deref()));
            println!("  Sessions:      {}", s.sessions);
            println!("  Events:        {}", s.events);
            println!("  Success rate:  {}", format_rate(s.success_rate));
            println!("  Avg duration:  {}", format_duration_ms(s.avg_duration_ms));
            println!("  Tokens in:     {}", s.tokens_in);
            println!("  Tokens out:    {}", s.tokens_out);
            println!("  Executions:    {}", s.executions);
        }
        StatsTable::Tools { scope } => {
            let rows = store.tool_stats(scope.project.as_deref(), scope.limit, scope.offset)?;
            println!(
                "{:<24} {:>8} {:>8} {:>8} {:>10} {:>12}",
                "TOOL", "CALLS", "OK", "FAILED", "RATE", "AVG"
            );
            for r in rows {
                println!(
                    "{:<24} {:>8} {:>8} {:>8} {:>10} {:>12}",
                    r.tool_name,
                    r.total_calls,
                    r.successes,
                    r.failures,
                    format_rate(r.success_rate),
                    format_duration_ms(r.avg_duration_ms)
                );
            }
        }
        StatsTable::Bash { scope } => {
            let rows = store.bash_stats(scope.project.as_deref(), scope.limit, scope.offset)?;
            println!(
                "{:>8} {:>8} {:>8} {:>10}  {}",
                "RUNS", "OK", "FAILED", "RATE", "COMMAND"
            );
            for r in rows {
                println!(
                    "{:>8} {:>8} {:>8} {:>10}  {}",
                    r.total_calls,
                    r.successes,
                    r.failures,
                    format_rate(r.success_rate),
                    truncate(&r.command, 70)
                );
            }
        }
        StatsTable::Files { scope } => {
            let rows = store.file_stats(scope.project.as_deref(), scope.limit, scope.offset)?;
            println!(
                "{:<8} {:>6} {:>6} {:>8} {:>10}  {}",
                "OP", "OPS", "OK", "FAILED", "BYTES", "PATH"
            );
            for r in rows {
                println!(
                    "{:<8} {:>6} {:>6} {:>8} {:>10}  {}",
                    r.operation.as_str(),
                    r.total_ops,
                    r.successes,
                    r.failures,
                    r.total_bytes,
                    r.path
                );
            }
        }
        StatsTable::Errors { scope } => {
            let rows = store.error_patterns(scope.project.as_deref(), scope.limit, scope.offset)?;
            println!(
                "{:<6} {:>6} {:>12}  {:<30} {}",
                "KIND", "COUNT", "LAST", "COMPONENT", "MESSAGE"
            );
            for r in rows {
                println!(
                    "{:<6} {:>6} {:>12}  {:<30} {}",
                    r.kind.as_str(),
                    r.occurrences,
                    format_relative_time(r.last_occurred),
                    truncate(&r.component, 30),
                    truncate(&r.message, 60)
                );
            }
        }
        StatsTable::Agents { scope } => {
            let rows =
                store.agent_type_stats(scope.project.as_deref(), scope.limit, scope.offset)?;
            println!(
                "{:<20} {:>8} {:>8} {:>8} {:>10} {:>10}",
                "AGENT", "TASKS", "OK", "FAILED", "RATE", "AVG (s)"
            );
            for r in rows {
                println!(
                    "{:<20} {:>8} {:>8} {:>8} {:>10} {:>10.1}",
                    r.agent,
                    r.total_tasks,
                    r.successes,
                    r.failures,
                    format_rate(r.success_rate),
                    r.avg_duration_seconds
                );
            }
        }
    }
    Ok(())
}

fn run_export(
    store: &Store,
    format: &str,
    output: Option<PathBuf>,
    project: Option<&str>,
    limit: i64,
) -> Result<()> {
    let format = ExportFormat::from_str(format)?;
    let bundle = MetricsBundle::collect(store, project, limit)?;
    let rendered = bundle.render(format)?;

    match output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Exported to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn scope_suffix(project: Option<&str>) -> String {
    match project {
        Some(p) => format!(" for {}", p),
        None => String::new(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
