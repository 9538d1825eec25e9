use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use songflowd::{
    config::DaemonConfig,
    queue::{TaskListParams, TaskStore, TaskType},
    rest,
    storage::Storage,
    AppContext,
};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "songflowd",
    about = "Songflow — song pipeline automation daemon",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// REST API server port
    #[arg(long, env = "SONGFLOWD_PORT")]
    port: Option<u16>,

    /// Data directory for config and the SQLite database
    #[arg(long, env = "SONGFLOWD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SONGFLOWD_LOG")]
    log: Option<String>,

    /// Bind address for the REST server (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "SONGFLOWD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "SONGFLOWD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand given).
    ///
    /// Runs songflowd in the foreground: worker pool plus REST API, until
    /// ctrl-c.
    Serve,
    /// Inspect or modify the task queue directly.
    ///
    /// Opens the database itself — no running daemon needed.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List tasks in dispatch order (priority desc, oldest first).
    List {
        /// Filter by status: pending, running, completed, failed
        #[arg(long)]
        status: Option<String>,
        /// Filter by task type, e.g. evaluate, publish
        #[arg(long)]
        task_type: Option<String>,
        /// Maximum number of tasks to show
        #[arg(long, default_value_t = 50)]
        limit: i64,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show queue statistics.
    Stats {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Enqueue a task.
    Add {
        /// Task type tag, e.g. evaluate, publish, cleanup
        task_type: String,
        /// Song the task acts on (omit for maintenance tasks)
        #[arg(long)]
        song: Option<String>,
        /// Dispatch priority, higher first
        #[arg(long, default_value_t = 0)]
        priority: i64,
        /// Opaque JSON payload passed to the handler
        #[arg(long)]
        payload: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Queue { action }) => run_queue(action, args.data_dir).await,
        None | Some(Command::Serve) => run_server(args).await,
    }
}

async fn run_server(args: Args) -> Result<()> {
    let config = DaemonConfig::new(args.port, args.data_dir, args.log, args.bind_address);
    let _file_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "songflowd starting");
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        workers = config.worker.count,
        check_interval_secs = config.worker.check_interval_secs,
        "config loaded"
    );

    let ctx = AppContext::build(config)
        .await
        .context("failed to initialize application context")?;
    let pool = ctx.start_workers();

    let mut server = tokio::spawn(rest::serve(ctx.clone()));
    tokio::select! {
        res = &mut server => {
            // The server only returns early when bind or accept failed.
            pool.stop().await;
            return match res {
                Ok(Ok(())) => Err(anyhow::anyhow!("REST server exited unexpectedly")),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(e.into()),
            };
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    server.abort();
    pool.stop().await;
    info!("songflowd stopped");
    Ok(())
}

async fn run_queue(action: QueueAction, data_dir: Option<std::path::PathBuf>) -> Result<()> {
    // Keep logging quiet so the CLI output stays clean.
    let config = DaemonConfig::new(None, data_dir, Some("error".to_string()), None);
    let _guard = setup_logging(&config.log, None, &config.log_format);

    let storage = Storage::new(&config.data_dir).await?;
    let store = TaskStore::new(storage.pool());

    match action {
        QueueAction::List {
            status,
            task_type,
            limit,
            json,
        } => {
            let params = TaskListParams {
                status: status
                    .as_deref()
                    .map(str::parse)
                    .transpose()
                    .map_err(|e: String| anyhow::anyhow!(e))?,
                task_type: task_type
                    .as_deref()
                    .map(str::parse)
                    .transpose()
                    .map_err(|e: String| anyhow::anyhow!(e))?,
                skip: 0,
                limit: Some(limit),
            };
            let (tasks, total) = store.list(&params).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks found.");
            } else {
                println!(
                    "{:<6} {:<18} {:<10} {:>4}  {:<20} CREATED",
                    "ID", "TYPE", "STATUS", "PRI", "SONG"
                );
                println!("{}", "-".repeat(84));
                for t in &tasks {
                    println!(
                        "{:<6} {:<18} {:<10} {:>4}  {:<20} {}",
                        t.id,
                        t.task_type.as_str(),
                        t.status.as_str(),
                        t.priority,
                        t.song_id.as_deref().unwrap_or("-"),
                        format_ts(t.created_at)
                    );
                }
                println!("\n{} of {} task(s)", tasks.len(), total);
            }
        }

        QueueAction::Stats { json } => {
            let stats = store.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "Tasks: {} total — {} pending, {} running, {} completed, {} failed",
                    stats.total_count,
                    stats.pending_count,
                    stats.running_count,
                    stats.completed_count,
                    stats.failed_count
                );
                if let Some(avg) = stats.avg_completion_time_seconds {
                    println!("Average completion time: {avg:.1}s");
                }
                if let Some(age) = stats.oldest_pending_task_age_seconds {
                    println!("Oldest pending task age: {age}s");
                }
            }
        }

        QueueAction::Add {
            task_type,
            song,
            priority,
            payload,
        } => {
            let task_type: TaskType = task_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let task = store
                .enqueue(
                    task_type,
                    song.as_deref(),
                    payload.as_deref(),
                    priority,
                    config.worker.max_retries,
                )
                .await?;
            println!("Enqueued task {} ({})", task.id, task.task_type);
        }
    }

    Ok(())
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Initialize the tracing subscriber.
///
/// `log_format` selects `"pretty"` (default, compact human-readable) or
/// `"json"` (structured, for log aggregators). With `log_file` set, the same
/// events also go to a daily-rolling file; the returned `WorkerGuard` must
/// stay alive for the process lifetime so the file writer flushes. An
/// uncreatable log directory degrades to stdout-only, never a panic.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let file_writer = log_file.and_then(|path| {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("songflowd.log"));
        // tracing-appender opens the file lazily; the directory must exist.
        match std::fs::create_dir_all(dir) {
            Ok(()) => Some(tracing_appender::non_blocking(
                tracing_appender::rolling::daily(dir, filename),
            )),
            Err(e) => {
                eprintln!(
                    "warn: could not create log directory '{}': {e}; logging to stdout only",
                    dir.display()
                );
                None
            }
        }
    });

    let base = tracing_subscriber::registry().with(EnvFilter::new(log_level));
    // The json and compact fmt layers are distinct types, so each combination
    // needs its own init call.
    match (log_format == "json", file_writer) {
        (true, Some((writer, guard))) => {
            base.with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(writer))
                .init();
            Some(guard)
        }
        (true, None) => {
            base.with(fmt::layer().json()).init();
            None
        }
        (false, Some((writer, guard))) => {
            base.with(fmt::layer().compact())
                .with(fmt::layer().with_writer(writer))
                .init();
            Some(guard)
        }
        (false, None) => {
            base.with(fmt::layer().compact()).init();
            None
        }
    }
}
