use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Run a command unless it already ran too often within the trailing period.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Group the command's executions are counted under
    #[arg(short, long, env = "THROTTLER_GROUP")]
    pub group: String,

    /// Maximum successful runs allowed within the period
    #[arg(
        short = 'n',
        long,
        env = "THROTTLER_MAX_ACTIONS",
        required_unless_present = "config"
    )]
    pub max_actions: Option<u32>,

    /// Length of the trailing window, e.g. "90s", "5m", "1h 30m"
    #[arg(
        short,
        long,
        env = "THROTTLER_PERIOD",
        value_parser = humantime::parse_duration,
        required_unless_present = "config"
    )]
    pub period: Option<Duration>,

    /// JSON file holding `max_allowed_actions` and `period`
    #[arg(long, env = "THROTTLER_CONFIG", conflicts_with_all = ["max_actions", "period"])]
    pub config: Option<PathBuf>,

    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Prefix of every key written to Redis
    #[arg(long, env = "THROTTLER_PREFIX", default_value = "throttler")]
    pub prefix: String,

    /// Keep executions in process memory instead of Redis
    #[arg(long)]
    pub memory: bool,

    /// Give up on a storage call after this long
    #[arg(long, env = "THROTTLER_STORAGE_TIMEOUT", value_parser = humantime::parse_duration)]
    pub storage_timeout: Option<Duration>,

    #[arg(long, env = "THROTTLER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to run, followed by its arguments
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}
