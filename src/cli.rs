use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Read};
use std::sync::Arc;
use usage_gate::clock::{Clock, SystemClock};
use usage_gate::config::Config;
use usage_gate::error::{Error, Result};
use usage_gate::events::{apply_event, BillingEvent};
use usage_gate::ledger::{DebitSource, UsageService, UsageStats};
use usage_gate::rate_limit::{LimitStats, LimiterSet};
use usage_gate::storage::FileStorage;

#[derive(Parser)]
#[command(name = "usage-gate")]
#[command(about = "Usage Gate CLI - Monthly quotas, purchased credits and rate windows")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: "human" or "json"
    #[arg(short, long)]
    pub format: Option<String>,

    /// Data directory path
    #[arg(short, long)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory
    Init,

    /// Show a user's usage, tier and credits
    Status {
        /// User id
        user: String,
    },

    /// Ask whether a user may perform one more billable operation
    Check {
        /// User id
        user: String,
    },

    /// Admit and debit one operation (rate windows, then ledger)
    Consume {
        /// User id
        user: String,

        /// Kind of operation being billed
        #[arg(short, long, default_value = "try-on")]
        action: String,

        /// Related item (e.g. a garment id)
        #[arg(short, long)]
        item: Option<String>,
    },

    /// Apply a billing event
    Event {
        /// Event JSON (or read from stdin if not provided)
        #[arg(short, long)]
        json: Option<String>,

        /// Event file path
        #[arg(short, long)]
        file: Option<String>,
    },

    /// Show every rate window
    Limits,

    /// Clear every rate window
    ResetLimits,
}

/// Read event body from file or stdin
fn read_event(file: Option<&str>) -> Result<String> {
    match file {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| Error::InvalidEvent(format!("Failed to read file {}: {}", path, e))),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| Error::InvalidEvent(format!("Failed to read from stdin: {}", e)))?;
            Ok(buffer)
        }
    }
}

/// Format output based on format type
fn format_output<T: serde::Serialize + std::fmt::Debug>(data: &T, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(data)
            .map_err(|e| Error::Storage(format!("Failed to serialize JSON: {}", e))),
        _ => Ok(format!("{:#?}", data)),
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.set_data_dir(std::path::PathBuf::from(dir));
    }
    if let Some(format) = cli.format {
        config.set_output_format(format);
    }
    usage_gate::logger::init(config.get_log_level());

    let format = config.get_output_format().to_string();
    let storage = Arc::new(FileStorage::new(&config));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = UsageService::new(Arc::clone(&storage), Arc::clone(&clock), config.plan_catalog())
        .with_max_cas_retries(config.max_cas_retries);
    let limiters = LimiterSet::from_configs(config.rate_limit_configs()?, storage, clock);

    match cli.command {
        Commands::Init => {
            for dir in [config.get_ledger_dir(), config.get_window_dir()] {
                fs::create_dir_all(&dir).map_err(|e| {
                    Error::Storage(format!("Failed to create {}: {}", dir.display(), e))
                })?;
            }
            println!("Initialized data directory at: {}", config.get_data_dir().display());
            Ok(())
        }

        Commands::Status { user } => {
            let output = StatusOutput {
                user: user.clone(),
                stats: service.get_usage_stats(&user)?,
            };
            println!("{}", format_output(&output, &format)?);
            Ok(())
        }

        Commands::Check { user } => {
            let admission = service.can_consume(&user)?;
            println!("{}", format_output(&admission, &format)?);
            Ok(())
        }

        Commands::Consume { user, action, item } => {
            service.ensure_can_consume(&user)?;
            limiters.check_all_limits()?;
            let source = service.consume(&user, &action, item.as_deref())?;

            let output = ConsumeOutput {
                user: user.clone(),
                action,
                source,
                stats: service.get_usage_stats(&user)?,
            };
            println!("{}", format_output(&output, &format)?);
            Ok(())
        }

        Commands::Event { json, file } => {
            let body = match json {
                Some(json) => json,
                None => read_event(file.as_deref())?,
            };
            let event = BillingEvent::from_json(&body)?;
            let outcome = apply_event(&service, &event)?;
            println!("{}", format_output(&outcome, &format)?);
            Ok(())
        }

        Commands::Limits => {
            let windows = limiters
                .stats()?
                .into_iter()
                .map(|(name, stats)| WindowOutput { name, stats })
                .collect();
            println!("{}", format_output(&LimitsOutput { windows }, &format)?);
            Ok(())
        }

        Commands::ResetLimits => {
            limiters.reset_all()?;
            println!("✓ Rate windows cleared");
            Ok(())
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct StatusOutput {
    user: String,
    stats: UsageStats,
}

#[derive(Debug, serde::Serialize)]
struct ConsumeOutput {
    user: String,
    action: String,
    source: DebitSource,
    stats: UsageStats,
}

#[derive(Debug, serde::Serialize)]
struct WindowOutput {
    name: String,
    stats: LimitStats,
}

#[derive(Debug, serde::Serialize)]
struct LimitsOutput {
    windows: Vec<WindowOutput>,
}
