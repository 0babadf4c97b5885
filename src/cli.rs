// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::RecognitionKind;

/// Command-line arguments for `autoflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "autoflow",
    version,
    about = "Sequence, supervise and resume automation-engine task flows.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Autoflow.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `AUTOFLOW_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Recover any interrupted run, then run the schedule until Ctrl-C.
    Serve,
    /// Run the configured flow now and print its report.
    Run,
    /// Print the engine invocation for each enabled task without running it.
    Plan,
    /// Print the persisted run context, if any.
    Status,
    /// Extract a recognition result from the engine log.
    Extract {
        /// `inventory` or `roster`.
        #[arg(value_name = "KIND")]
        kind: RecognitionKind,
    },
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
    fn parses_subcommands_and_globals() {
        let args =
            CliArgs::try_parse_from(["autoflow", "--log-level", "debug", "extract", "roster"])
                .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert!(matches!(
            args.command,
            Command::Extract {
                kind: RecognitionKind::Roster
            }
        ));
        assert_eq!(args.config, "Autoflow.toml");
    }

    #[test]
    fn unknown_extract_kind_is_rejected() {
        assert!(CliArgs::try_parse_from(["autoflow", "extract", "weather"]).is_err());
    }
}
