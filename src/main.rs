use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use hive::channel::MessageChannel;
use hive::config::Config;
use hive::orchestration::completion::CompletionService;
use hive::orchestration::worker::WorkerExecutor;
use hive::orchestration::{HeadlessCompletion, Planner, ProcessExecutor, Scheduler, Strategy};
use hive::registry::WorkerRegistry;
use hive::store::TaskStore;
use hive::{hlog, hlog_error, hlog_warn, Result, SessionStatus};

/// Hive - multi-worker task orchestrator
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    HIVE_DEBUG=1    Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.hive/hive.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Plan a request, execute it across the worker pool, print a JSON summary
    Run {
        /// The request in natural language
        request: String,

        /// Execution strategy
        #[arg(long, short = 's', value_enum, default_value_t = Strategy::Sequential)]
        strategy: Strategy,

        /// Override the per-task timeout, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List durable task records
    Tasks,

    /// Show the configured worker pool
    Workers,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    hive::log::init_with_debug(cli.debug);

    let result = match cli.command {
        Command::Run {
            request,
            strategy,
            timeout,
        } => run_request(request, strategy, timeout),
        Command::Tasks => run_tasks(),
        Command::Workers => run_workers(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            hlog_error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::from(2)
        }
    }
}

/// Execute one request end to end and report the session as JSON.
///
/// Exit codes: 0 when every task completed, 1 for a partial failure,
/// 2 when infrastructure (config, store) failed before or during the run.
fn run_request(request: String, strategy: Strategy, timeout: Option<u64>) -> Result<ExitCode> {
    hlog!("Run command: strategy={}, request={:?}", strategy, request);
    let config = Config::load()?;

    let registry = Arc::new(WorkerRegistry::new(config.max_spawn_per_type));
    for spec in &config.workers {
        registry.register(spec.worker_type.clone(), spec.capacity)?;
    }

    let store = Arc::new(TaskStore::open(&config.store_dir()?)?);
    let channel = Arc::new(MessageChannel::new());
    let completion: Arc<dyn CompletionService> = Arc::new(completion_client(&config));
    let executor: Arc<dyn WorkerExecutor> = Arc::new(worker_executor(&config));

    let task_timeout = Duration::from_secs(timeout.unwrap_or(config.task_timeout_secs));
    let scheduler = Scheduler::new(registry, store, channel, Planner::new(completion), executor)
        .with_task_timeout(task_timeout)
        .with_max_requeues(config.max_requeues);

    let rt = tokio::runtime::Runtime::new()?;
    let session = rt.block_on(scheduler.run(&request, strategy))?;

    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(match session.status {
        SessionStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::from(1),
    })
}

/// Build the planner's completion client.
///
/// A missing binary is not fatal here: the planner falls back to a
/// single-task plan when the completion call fails.
fn completion_client(config: &Config) -> HeadlessCompletion {
    let command = config.effective_completion_command();
    match HeadlessCompletion::new(command) {
        Ok(client) => client,
        Err(e) => {
            hlog_warn!("completion binary not on PATH ({}), deferring to call time", e);
            HeadlessCompletion::with_binary(PathBuf::from(command))
        }
    }
}

/// Build the executor workers run per task.
fn worker_executor(config: &Config) -> ProcessExecutor {
    let command = config.effective_worker_command();
    match ProcessExecutor::new(command) {
        Ok(executor) => executor,
        Err(e) => {
            hlog_warn!("worker binary not on PATH ({}), deferring to call time", e);
            ProcessExecutor::with_binary(PathBuf::from(command))
        }
    }
}

fn run_tasks() -> Result<ExitCode> {
    hlog!("Tasks command");
    let config = Config::load()?;
    let store = TaskStore::open(&config.store_dir()?)?;
    let records = store.list()?;

    if records.is_empty() {
        println!("No task records.");
        return Ok(ExitCode::SUCCESS);
    }

    for record in records {
        let worker_type = record
            .worker_type
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<24} {:<10} {}",
            record.id.short(),
            record.status.to_string(),
            worker_type,
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_workers() -> Result<ExitCode> {
    hlog!("Workers command");
    let config = Config::load()?;

    println!("Configured workers:");
    for spec in &config.workers {
        println!("  {:<10} capacity {}", spec.worker_type, spec.capacity);
    }
    println!();
    println!("Max spawned per type: {}", config.max_spawn_per_type);
    println!("Task timeout:         {}s", config.task_timeout_secs);
    Ok(ExitCode::SUCCESS)
}
