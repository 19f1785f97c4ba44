//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate};
use clap::{Args, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Ingest command arguments.
#[derive(Debug, Args)]
pub struct IngestCommand {
    /// JSON-lines file of observation payloads, or `-` for stdin
    pub input: PathBuf,

    /// Stop at the first rejected line
    #[arg(long)]
    pub strict: bool,

    /// Output format for the summary
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// State command arguments.
#[derive(Debug, Args)]
pub struct StateCommand {
    /// ICAO identifier of the airplane
    pub airplane_id: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// History command arguments.
#[derive(Debug, Args)]
pub struct HistoryCommand {
    /// ICAO identifier of the airplane
    pub airplane_id: String,

    /// Include observations at or after this time (epoch ms, RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Include observations before this time
    #[arg(long)]
    pub until: Option<String>,

    /// Stop after this many observations
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// Active command arguments.
#[derive(Debug, Args)]
pub struct ActiveCommand {
    /// Window in seconds (defaults to `query.active_window_secs`)
    #[arg(short, long)]
    pub within_secs: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "plain")]
    pub format: OutputFormat,
}

/// Flight reference data commands.
#[derive(Debug, Subcommand)]
pub enum FlightsCommand {
    /// Import flights from a JSON array
    Import {
        /// File containing the flights
        file: PathBuf,
    },

    /// Show one flight
    Show {
        /// Flight callsign
        callsign: String,
    },
}

/// Airport reference data commands.
#[derive(Debug, Subcommand)]
pub enum AirportsCommand {
    /// Import airports from a JSON array
    Import {
        /// File containing the airports
        file: PathBuf,
    },

    /// Show one airport
    Show {
        /// Airport prefix
        prefix: String,
    },
}

/// Collector commands.
#[derive(Debug, Subcommand)]
pub enum CollectorsCommand {
    /// Register a collector or update its location
    Register {
        /// Collector UUID
        id: Uuid,

        /// Station latitude
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,

        /// Station longitude
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
    },

    /// Show a registered collector
    Show {
        /// Collector UUID
        id: Uuid,
    },
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Output format for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Plain,
    /// JSON output
    Json,
}

/// Parse a command-line time into epoch milliseconds.
///
/// Accepts a bare integer (already milliseconds), an RFC 3339 timestamp, or
/// a `YYYY-MM-DD` date taken as midnight UTC.
///
/// # Errors
///
/// Returns a validation error if none of the forms match.
pub fn parse_timestamp(input: &str) -> Result<i64> {
    let input = input.trim();
    if let Ok(millis) = input.parse::<i64>() {
        return Ok(millis);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp_millis());
    }
    if let Some(midnight) = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc().timestamp_millis());
    }
    Err(Error::validation(
        "time",
        format!("{input:?} is not epoch milliseconds, RFC 3339 or YYYY-MM-DD"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_millis() {
        assert_eq!(parse_timestamp("1482082920000").unwrap(), 1_482_082_920_000);
    }

    #[test]
    fn test_parse_timestamp_rfc3339() {
        assert_eq!(
            parse_timestamp("2016-12-18T17:42:00Z").unwrap(),
            1_482_082_920_000
        );
        assert_eq!(
            parse_timestamp("2016-12-18T14:42:00-03:00").unwrap(),
            1_482_082_920_000
        );
    }

    #[test]
    fn test_parse_timestamp_date() {
        assert_eq!(parse_timestamp("1970-01-02").unwrap(), 86_400_000);
    }

    #[test]
    fn test_parse_timestamp_invalid() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Plain);
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
