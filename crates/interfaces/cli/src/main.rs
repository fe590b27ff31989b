mod scan_cmds;

use std::path::Path;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vaultbell_config::{AppConfig, DEFAULT_CONFIG_PATH};

#[derive(Debug, Parser)]
#[command(
    name = "vaultbell",
    version,
    about = "Turns reminder metadata in Obsidian notes into scheduled notifications"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a single scan pass.
    Scan {
        /// Scan this directory from now on instead of the persisted root.
        #[arg(long, value_name = "DIR")]
        root: Option<String>,
    },
    /// Scan periodically and announce due reminders until Ctrl-C.
    Watch,
    /// List stored notes with a pending trigger, soonest first.
    Upcoming {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Evaluate a reminder date and recurrence rule against the current time.
    /// Example: vaultbell resolve --anchor 2024-01-31T09:00 --rule "on the last day of each month"
    Resolve {
        #[arg(long)]
        anchor: String,
        #[arg(long)]
        rule: Option<String>,
        #[arg(long)]
        stop: Option<String>,
    },
    /// Show the persisted scan state.
    Status,
    /// Configure reminders taken from task annotations.
    Tasks {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Only honour task annotations in directories containing this text.
        /// Pass an empty string to lift the restriction.
        #[arg(long, value_name = "DIR")]
        restrict: Option<String>,
    },
    /// Write the default config file.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Show the most recent entries of the diagnostic error log.
    Errors {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn env_filter(config: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level))
}

/// Console logging plus a daily-rolling file under `<data_dir>/logs`.
fn init_file_logging(config: &AppConfig) -> Result<WorkerGuard> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "vaultbell.log"));

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer),
        )
        .try_init()?;
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load_from(DEFAULT_CONFIG_PATH)?;
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Status);

    let _log_guard = if matches!(command, Commands::Watch) {
        Some(init_file_logging(&config)?)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter(&config))
            .init();
        None
    };

    match command {
        Commands::Scan { root } => scan_cmds::run_scan(&config, root).await?,
        Commands::Watch => scan_cmds::run_watch(&config).await?,
        Commands::Upcoming { limit } => scan_cmds::run_upcoming(&config, limit.max(1)).await?,
        Commands::Resolve { anchor, rule, stop } => {
            scan_cmds::run_resolve(&anchor, rule.as_deref(), stop.as_deref())?
        }
        Commands::Status => scan_cmds::run_status(&config).await?,
        Commands::Tasks {
            enable,
            disable,
            restrict,
        } => scan_cmds::run_tasks(&config, enable, disable, restrict).await?,
        Commands::Init { force } => {
            if Path::new(DEFAULT_CONFIG_PATH).exists() && !force {
                bail!("{DEFAULT_CONFIG_PATH} already exists (pass --force to overwrite)");
            }
            AppConfig::default().save_to(DEFAULT_CONFIG_PATH)?;
            println!("wrote {DEFAULT_CONFIG_PATH}");
        }
        Commands::Errors { limit } => scan_cmds::run_errors(&config, limit.max(1)).await?,
    }

    Ok(())
}
