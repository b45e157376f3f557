use action_throttler::{
    ExecuteError, MemoryStorage, RedisStorage, Storage, Throttler, ThrottlerConfig,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::command::{CommandAction, CommandError};

mod cli;
mod command;

// sysexits(3)
const EXIT_UNAVAILABLE: u8 = 69;
const EXIT_SOFTWARE: u8 = 70;
const EXIT_TEMPFAIL: u8 = 75;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("action_throttler={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;
    tracing::debug!(
        max_allowed_actions = config.max_allowed_actions,
        period = %humantime::format_duration(config.period),
        "loaded throttler configuration"
    );

    let (program, args) = cli
        .command
        .split_first()
        .context("no command given")?;
    let action = CommandAction::new(&cli.group, program, args.to_vec());

    if cli.memory {
        tracing::warn!("using in-memory storage; executions are forgotten on exit");
        run(&cli, config, MemoryStorage::new(), &action).await
    } else {
        tracing::info!(redis_url = %cli.redis_url, prefix = %cli.prefix, "connecting to redis");
        let storage = RedisStorage::connect(&cli.redis_url, cli.prefix.clone())
            .await
            .with_context(|| format!("failed to connect to {}", cli.redis_url))?;
        run(&cli, config, storage, &action).await
    }
}

fn load_config(cli: &Cli) -> Result<ThrottlerConfig> {
    if let Some(path) = &cli.config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        return ThrottlerConfig::from_json(&raw)
            .with_context(|| format!("invalid configuration in {}", path.display()));
    }

    let max_actions = cli.max_actions.context("--max-actions is required")?;
    let period = cli.period.context("--period is required")?;
    Ok(ThrottlerConfig::new(max_actions, period)?)
}

async fn run<S: Storage>(
    cli: &Cli,
    config: ThrottlerConfig,
    storage: S,
    action: &CommandAction,
) -> Result<ExitCode> {
    let mut throttler = Throttler::from_config(config, storage);
    if let Some(timeout) = cli.storage_timeout {
        throttler = throttler.with_storage_timeout(timeout);
    }

    let code = match throttler.execute(action).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ExecuteError::LimitExceeded) => {
            eprintln!(
                "{}: limit of {} runs per {} reached, not running",
                cli.group,
                config.max_allowed_actions,
                humantime::format_duration(config.period)
            );
            ExitCode::from(EXIT_TEMPFAIL)
        }
        Err(ExecuteError::Action(err)) => {
            eprintln!("{}", err);
            ExitCode::from(command_exit_code(&err))
        }
        Err(err @ ExecuteError::Query(_)) => {
            eprintln!("{}", err);
            ExitCode::from(EXIT_UNAVAILABLE)
        }
        Err(err @ ExecuteError::Save(_)) => {
            eprintln!("command ran, but {}", err);
            ExitCode::from(EXIT_SOFTWARE)
        }
    };

    Ok(code)
}

fn command_exit_code(err: &CommandError) -> u8 {
    // Signals and out-of-range codes still have to read as a failure.
    u8::try_from(err.exit_code())
        .ok()
        .filter(|code| *code != 0)
        .unwrap_or(1)
}
