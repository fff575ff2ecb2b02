//! Contains the Cli implementation of backdrop.
use std::{fmt::Display, path::PathBuf};

use clap::{crate_name, Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[arg(short, long, default_value_t = LogLevel::Error,  help = "",
        long_help = concat!(
        "*Note*: You can also set the log level through the `RUST_LOG` environment variable and filter the logs.\n",
        "See https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html#directives\n",
        "\n",
        "Example: `RUST_LOG=[scheduler]=debug ", crate_name!(), " - This will enable logs only related to the redraw scheduling in debug mode."
    ))]
    pub log_level: LogLevel,

    /// Where to write the logs to. (default: `$XDG_STATE_HOME/backdrop/log.log`)
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// The config file. (default: `$XDG_CONFIG_HOME/backdrop/config.toml`)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Daemon)
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Keep the background on every output. (default)
    Daemon,

    /// Print what is known about the outputs as json and exit.
    Outputs,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    Off,
}

impl From<&LogLevel> for LevelFilter {
    fn from(level: &LogLevel) -> Self {
        match level {
            LogLevel::Error => Self::ERROR,
            LogLevel::Warn => Self::WARN,
            LogLevel::Info => Self::INFO,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Trace => Self::TRACE,
            LogLevel::Off => Self::OFF,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", LevelFilter::from(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_is_default() {
        let cli = Cli::try_parse_from(["backdrop"]).unwrap();
        assert_eq!(cli.command(), Command::Daemon);
        assert_eq!(cli.log_level, LogLevel::Error);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_outputs_with_options() {
        let cli = Cli::try_parse_from([
            "backdrop",
            "--log-level",
            "debug",
            "--config",
            "/tmp/backdrop.toml",
            "outputs",
        ])
        .unwrap();

        assert_eq!(cli.command(), Command::Outputs);
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/backdrop.toml")));
    }
}
