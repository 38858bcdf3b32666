//! # mailscore CLI Module
//!
//! This module implements the CLI interface for mailscore.
//!
//! ## Available Commands
//!
//! - `scan` - Score one or more message descriptors
//! - `check` - Validate the configuration and show what it builds

mod commands;

use clap::{Parser, Subcommand};
use mailscore_core::ScoreError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// mailscore - message scoring
///
/// Runs the configured filters against message descriptors and reports the
/// per-metric score and disposition.
#[derive(Parser, Debug)]
#[command(name = "mailscore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the TOML configuration (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Score message descriptors
    Scan {
        /// Message descriptor files (JSON object or array)
        #[arg(short, long = "message", required = true, num_args = 1..)]
        messages: Vec<PathBuf>,

        /// Maximum number of messages scanned concurrently
        #[arg(short, long, default_value = "4")]
        workers: usize,
    },

    /// Validate configuration
    Check,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), ScoreError> {
    let config = cli.config.as_deref();
    let json_mode = cli.json_mode;

    match cli.command {
        Commands::Scan { messages, workers } => {
            cmd_scan(config, json_mode, &messages, workers).await
        }
        Commands::Check => cmd_check(config, json_mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scan_arguments() {
        let cli = Cli::try_parse_from([
            "mailscore", "-c", "mail.toml", "--json-mode", "scan", "-m", "a.json", "b.json",
            "--workers", "2",
        ])
        .expect("parse");
        assert!(cli.json_mode);
        assert_eq!(cli.config, Some(PathBuf::from("mail.toml")));
        match cli.command {
            Commands::Scan { messages, workers } => {
                assert_eq!(messages.len(), 2);
                assert_eq!(workers, 2);
            }
            Commands::Check => unreachable!("expected scan"),
        }
    }

    #[test]
    fn scan_requires_a_message() {
        assert!(Cli::try_parse_from(["mailscore", "scan"]).is_err());
    }
}
