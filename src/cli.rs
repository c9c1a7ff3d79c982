// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `pipesim`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipesim",
    version,
    about = "Simulate CI/CD pipelines against a pool of synthetic runners.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML, or YAML by extension).
    ///
    /// Default: `Pipesim.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Pipesim.toml", conflicts_with = "import")]
    pub config: String,

    /// Import a YAML config instead of `--config`.
    #[arg(long, value_name = "PATH")]
    pub import: Option<String>,

    /// Start an execution of this template before the first tick.
    /// May be given more than once.
    #[arg(long = "start", value_name = "TEMPLATE")]
    pub start: Vec<String>,

    /// Number of ticks to run in virtual time.
    #[arg(long, value_name = "N", default_value_t = 60)]
    pub ticks: u64,

    /// Virtual seconds per tick.
    #[arg(long = "tick", value_name = "SECS", default_value_t = 10)]
    pub tick_secs: u64,

    /// Real milliseconds to wait between ticks (0 runs as fast as possible).
    #[arg(long, value_name = "MS", default_value_t = 0)]
    pub interval_ms: u64,

    /// Drive the engine from the system clock until Ctrl-C instead of
    /// running `--ticks` virtual ticks.
    #[arg(long)]
    pub realtime: bool,

    /// Reload the config file when it changes (requires `--realtime`).
    #[arg(long, requires = "realtime")]
    pub watch: bool,

    /// Component id for the engine inside the session.
    #[arg(long, value_name = "ID", default_value = "default")]
    pub component: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPESIM_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print templates, runners and schedules, but don't
    /// simulate anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final metrics snapshot and executions as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_repeatable() {
        let args = CliArgs::try_parse_from([
            "pipesim", "--start", "build", "--start", "deploy", "--ticks", "5", "--tick", "30",
        ])
        .unwrap();
        assert_eq!(args.start, vec!["build", "deploy"]);
        assert_eq!(args.ticks, 5);
        assert_eq!(args.tick_secs, 30);
        assert!(!args.realtime);
    }

    #[test]
    fn watch_requires_realtime() {
        assert!(CliArgs::try_parse_from(["pipesim", "--watch"]).is_err());
        assert!(CliArgs::try_parse_from(["pipesim", "--watch", "--realtime"]).is_ok());
    }
}
