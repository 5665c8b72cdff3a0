//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sensor Hub - routes simulated sensor events to subscriber connections
#[derive(Parser, Debug)]
#[command(
    name = "sensor-hub",
    author,
    version,
    about = "Sensor event hub driven by a simulated device",
    long_about = "Runs the sensor event hub against a simulated sensor device.\n\n\
                  Loads the sensor list and hub tunables from configuration, \n\
                  subscribes a monitor connection and reports delivery statistics."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "SENSOR_HUB_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "SENSOR_HUB_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Level used when RUST_LOG is unset
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the hub against the simulated device
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "config.toml",
        env = "SENSOR_HUB_CONFIG"
    )]
    pub config: PathBuf,

    /// Sensor handles to subscribe (default: every listed sensor)
    #[arg(short, long = "sensor", value_delimiter = ',')]
    pub sensors: Vec<i32>,

    /// Requested sampling period in milliseconds
    #[arg(long, default_value = "20", env = "SENSOR_HUB_PERIOD_MS")]
    pub period_ms: u64,

    /// Maximum batch latency in milliseconds
    #[arg(long, default_value = "0", env = "SENSOR_HUB_LATENCY_MS")]
    pub latency_ms: u64,

    /// Stop after this many seconds (0 = run until interrupted)
    #[arg(long, default_value = "0", env = "SENSOR_HUB_DURATION")]
    pub duration: u64,

    /// Seconds between progress reports (0 = disabled)
    #[arg(long, default_value = "5", env = "SENSOR_HUB_REPORT_INTERVAL")]
    pub report_interval: u64,

    /// Print the final hub snapshot as JSON
    #[arg(long)]
    pub snapshot: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "SENSOR_HUB_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show detailed sensor information
    #[arg(long)]
    pub sensors: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parse_sensor_list() {
        let cli = Cli::try_parse_from([
            "sensor-hub",
            "-v",
            "run",
            "--config",
            "hub.toml",
            "--sensor",
            "1,2",
            "--duration",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.default_log_level(), "debug");
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.config, PathBuf::from("hub.toml"));
        assert_eq!(args.sensors, vec![1, 2]);
        assert_eq!(args.duration, 3);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["sensor-hub", "-q", "-v", "info"]).is_err());
        let cli = Cli::try_parse_from(["sensor-hub", "-q", "info"]).unwrap();
        assert_eq!(cli.default_log_level(), "warn");
    }
}
