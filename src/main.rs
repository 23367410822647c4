//! # Chronovault: durable task scheduler
//!
//! Usage:
//!   chronovault serve                          # Run due tasks until Ctrl-C
//!   chronovault submit --log "hello" --every 60 --unit s
//!   chronovault submit --command "backup.sh /data" --cron "0 3 * * *"
//!   chronovault status 42
//!   chronovault find "backup%" --state SCHEDULED
//!   chronovault property set maintenance on

use std::path::PathBuf;

use anyhow::{Result, bail};
use chronovault_core::SchedulerConfig;
use chronovault_scheduler::{
    CronTrigger, LogMessage, RunCommand, Scheduler, StateFilter, StatusQuery, TaskRequest, TaskState, TaskStatus,
    TimeUnit, keys,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chronovault", version, about = "⏰ Chronovault: durable, transactional task scheduler")]
struct Cli {
    /// Config file (default: ~/.chronovault/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides the config
    #[arg(long, global = true)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Run tasks from the store until interrupted
    Serve,
    /// Submit a task
    Submit(SubmitArgs),
    /// Show one task
    Status { id: i64 },
    /// List tasks by name pattern (SQL LIKE)
    Find {
        #[arg(default_value = "%")]
        pattern: String,
        /// Only tasks in this state (SCHEDULED, SUCCESSFUL, FAILED, ...)
        #[arg(long)]
        state: Option<TaskState>,
        /// Only tasks with no executions left
        #[arg(long, conflicts_with = "state")]
        ended: bool,
        #[arg(long)]
        escape: Option<char>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Cancel a task's pending executions
    Cancel { id: i64 },
    /// Delete a task record
    Remove { id: i64 },
    /// Manage named properties
    #[command(subcommand)]
    Property(PropertyCommand),
}

#[derive(Args)]
struct SubmitArgs {
    /// Identity name used by `find`
    #[arg(long)]
    name: Option<String>,
    /// Log this message when the task runs
    #[arg(long, conflicts_with = "command", required_unless_present = "command")]
    log: Option<String>,
    /// Run this command line when the task runs
    #[arg(long)]
    command: Option<String>,
    /// Initial delay
    #[arg(long, default_value_t = 0)]
    delay: i64,
    /// Repeat at a fixed rate
    #[arg(long, conflicts_with_all = ["fixed_delay", "cron"])]
    every: Option<i64>,
    /// Repeat with a fixed delay between executions
    #[arg(long, conflicts_with = "cron")]
    fixed_delay: Option<i64>,
    /// Time unit of --delay, --every and --fixed-delay (ms, s, m, h, d)
    #[arg(long, default_value = "s")]
    unit: TimeUnit,
    /// Cron expression (5 fields)
    #[arg(long)]
    cron: Option<String>,
    /// Stop a cron task after this many executions
    #[arg(long, requires = "cron")]
    max_runs: Option<u32>,
    /// ALWAYS, NEVER or ON_SUCCESS
    #[arg(long)]
    auto_purge: Option<String>,
    /// Transaction timeout in seconds
    #[arg(long)]
    tx_timeout: Option<u64>,
}

#[derive(Subcommand)]
enum PropertyCommand {
    Get { name: String },
    Set { name: String, value: String },
    Remove { name: String },
    /// List properties matching a SQL LIKE pattern
    List {
        #[arg(default_value = "%")]
        pattern: String,
    },
}

fn load_config(cli: &Cli) -> Result<SchedulerConfig> {
    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::load_from(path)?,
        None => SchedulerConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    Ok(config)
}

/// A scheduler that accepts and inspects tasks without running them.
fn client(config: SchedulerConfig) -> Result<Scheduler> {
    let config = SchedulerConfig { enable_task_execution: false, ..config };
    Ok(Scheduler::builder(config).start()?)
}

fn print_status(status: &TaskStatus) {
    let next = status
        .next_execution_time()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into());
    println!(
        "{:>6}  {:<10}  {:<20}  next: {next}  attempts: {}",
        status.id(),
        status.state(),
        status.name(),
        status.attempts()
    );
}

fn build_request(args: SubmitArgs) -> Result<TaskRequest> {
    let mut request = match (args.log, args.command) {
        (Some(message), _) => TaskRequest::of(LogMessage::new(message)),
        (None, Some(line)) => match RunCommand::parse(&line) {
            Some(command) => TaskRequest::of(command),
            None => bail!("--command must not be empty"),
        },
        (None, None) => bail!("one of --log or --command is required"),
    };

    request = if let Some(expression) = args.cron {
        let mut trigger = CronTrigger::new(expression)?;
        if let Some(max) = args.max_runs {
            trigger = trigger.limit(max);
        }
        request.trigger(trigger)
    } else if let Some(period) = args.every {
        request.at_fixed_rate(args.delay, period, args.unit)
    } else if let Some(delay) = args.fixed_delay {
        request.with_fixed_delay(args.delay, delay, args.unit)
    } else {
        request.after(args.delay, args.unit)
    };

    if let Some(name) = args.name {
        request = request.name(name);
    }
    if let Some(policy) = args.auto_purge {
        request = request.property(keys::AUTO_PURGE, policy);
    }
    if let Some(secs) = args.tx_timeout {
        request = request.property(keys::TRANSACTION_TIMEOUT, secs.to_string());
    }
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "chronovault=debug,chronovault_scheduler=debug" } else { "chronovault=info,chronovault_scheduler=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Command::Init { force } => {
            let path = cli.config.clone().unwrap_or_else(SchedulerConfig::default_path);
            if path.exists() && !force {
                println!("⚠️  {} already exists (use --force to overwrite)", path.display());
                return Ok(());
            }
            SchedulerConfig::default().save_to(&path)?;
            println!("✅ Wrote {}", path.display());
        }
        Command::Serve => {
            let scheduler = Scheduler::builder(SchedulerConfig { enable_task_execution: true, ..config }).start()?;
            println!("⏰ Chronovault serving {}", scheduler.config().resolved_db_path().display());
            tokio::signal::ctrl_c().await?;
            println!("👋 Stopping; tasks in progress are retried after their claim expires");
        }
        Command::Submit(args) => {
            let scheduler = client(config)?;
            let status = scheduler.schedule(build_request(args)?)?;
            println!("✅ Task {} scheduled", status.id());
            print_status(&status);
        }
        Command::Status { id } => {
            let scheduler = client(config)?;
            let Some(status) = scheduler.status(id)? else {
                bail!("task {id} not found");
            };
            print_status(&status);
            if status.has_result() {
                match status.result() {
                    Ok(Some(value)) => println!("        result: {}", serde_json::to_string_pretty(&value)?),
                    Ok(None) => println!("        result: (none)"),
                    Err(e) => println!("        error: {e}"),
                }
            }
        }
        Command::Find { pattern, state, ended, escape, limit } => {
            let scheduler = client(config)?;
            let mut query = StatusQuery::named(pattern);
            if let Some(escape) = escape {
                query = query.escape(escape);
            }
            if let Some(state) = state {
                query = query.in_state(StateFilter::State(state));
            } else if ended {
                query = query.in_state(StateFilter::Ended);
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            let found = scheduler.find_task_status(&query)?;
            for status in &found {
                print_status(status);
            }
            println!("{} task(s)", found.len());
        }
        Command::Cancel { id } => {
            let scheduler = client(config)?;
            if scheduler.cancel(id, true)? {
                println!("🚫 Task {id} cancelled");
            } else {
                println!("⚠️  Task {id} not found or already ended");
            }
        }
        Command::Remove { id } => {
            let scheduler = client(config)?;
            if scheduler.remove(id)? {
                println!("🗑️  Task {id} removed");
            } else {
                println!("⚠️  Task {id} not found");
            }
        }
        Command::Property(command) => {
            let scheduler = client(config)?;
            match command {
                PropertyCommand::Get { name } => match scheduler.get_property(&name)? {
                    Some(value) => println!("{value}"),
                    None => bail!("property '{name}' not found"),
                },
                PropertyCommand::Set { name, value } => {
                    if !scheduler.set_property(&name, &value)? {
                        scheduler.create_property(&name, &value)?;
                    }
                    println!("✅ {name} = {value}");
                }
                PropertyCommand::Remove { name } => {
                    if scheduler.remove_property(&name)? {
                        println!("🗑️  {name} removed");
                    } else {
                        println!("⚠️  {name} not found");
                    }
                }
                PropertyCommand::List { pattern } => {
                    for (name, value) in scheduler.find_properties(&pattern, None)? {
                        println!("{name} = {value}");
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from(["chronovault", "submit", "--log", "hi", "--every", "5", "--unit", "m"]).unwrap();
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(args.every, Some(5));
        assert_eq!(args.unit, TimeUnit::Minutes);
        assert!(build_request(args).is_ok());
    }

    #[test]
    fn test_cli_requires_workload() {
        assert!(Cli::try_parse_from(["chronovault", "submit", "--delay", "5"]).is_err());
        assert!(Cli::try_parse_from(["chronovault", "submit", "--log", "a", "--command", "b"]).is_err());
    }

    #[test]
    fn test_bad_cron_rejected() {
        let cli = Cli::try_parse_from(["chronovault", "submit", "--log", "x", "--cron", "not a cron"]).unwrap();
        let Command::Submit(args) = cli.command else {
            panic!("expected submit");
        };
        assert!(build_request(args).is_err());
    }
}
