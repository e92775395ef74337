//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::envelope::Mode;

/// ctxbridge - cross-context instruction dispatch
#[derive(Parser)]
#[command(
    name = "cb",
    about = "Issue instructions across a ctxbridge event bus",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
///
/// Each one starts an in-process host with the built-in handlers and a
/// client connected to it.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List instructions and their required parameters
    Info {
        /// Mode to query (sync, async)
        #[arg(short, long, default_value = "sync")]
        mode: Mode,

        /// Only report these instructions
        #[arg(short, long, value_name = "NAME", num_args = 1..)]
        filter: Vec<String>,
    },

    /// Issue one instruction and print its outcome
    Call {
        /// Instruction name
        instruction: String,

        /// Request data as a JSON object
        #[arg(short, long, default_value = "{}")]
        data: String,

        /// Mode to call on (sync, async)
        #[arg(short, long, default_value = "sync")]
        mode: Mode,

        /// Give up after this many milliseconds (defaults to client.request-timeout-ms)
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Fire a batch of concurrent calls and report how they resolved
    Demo {
        /// Number of concurrent calls
        #[arg(short = 'n', long, default_value_t = 8)]
        concurrency: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_call() {
        let cli = Cli::try_parse_from([
            "cb", "call", "echo", "--data", r#"{"text":"hi"}"#, "--mode", "async", "-l", "debug",
        ])
        .unwrap();

        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Call {
                instruction,
                data,
                mode,
                timeout_ms,
            } => {
                assert_eq!(instruction, "echo");
                assert_eq!(data, r#"{"text":"hi"}"#);
                assert_eq!(mode, Mode::Async);
                assert!(timeout_ms.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_info_filter() {
        let cli = Cli::try_parse_from(["cb", "info", "--filter", "echo", "sleep"]).unwrap();
        match cli.command {
            Command::Info { mode, filter } => {
                assert_eq!(mode, Mode::Sync);
                assert_eq!(filter, vec!["echo", "sleep"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["cb", "info", "--mode", "later"]).is_err());
    }
}
