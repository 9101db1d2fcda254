//! Command-line interface for voxflow
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Worker-graph pipeline runtime for conversational audio
#[derive(Parser, Debug)]
#[command(
    name = "voxflow",
    version,
    about = "Worker-graph pipeline runtime for conversational audio"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline until end-of-stream or interrupt
    Run {
        /// Path to the pipeline configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Readiness timeout (default: 120s). Examples: 30s, 5m, 1h30m
        #[arg(
            long,
            short = 't',
            value_name = "DURATION",
            default_value = "120s",
            value_parser = parse_timeout_secs
        )]
        timeout: u64,
    },

    /// Validate a configuration and its worker graph without running it
    Check {
        /// Path to the pipeline configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

/// Parse a timeout duration string into seconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers
/// (seconds), single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`).
fn parse_timeout_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}
