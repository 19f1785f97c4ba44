//! Command-line interface for radarlivre.
//!
//! This module provides the CLI structure for the `radarlivre` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    parse_timestamp, ActiveCommand, AirportsCommand, CollectorsCommand, ConfigCommand,
    FlightsCommand, HistoryCommand, IngestCommand, OutputFormat, StateCommand, StatusCommand,
};

/// radarlivre - Latest-state aggregator for ADS-B observations
///
/// Ingests observations reported by ground collectors, keeps the full
/// observation history and answers where each airplane was last seen.
#[derive(Debug, Parser)]
#[command(name = "radarlivre")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest observations from a JSON-lines file
    Ingest(IngestCommand),

    /// Show the latest state of an airplane
    State(StateCommand),

    /// List the observations of an airplane
    History(HistoryCommand),

    /// List recently active airplanes
    Active(ActiveCommand),

    /// Manage flight reference data
    #[command(subcommand)]
    Flights(FlightsCommand),

    /// Manage airport reference data
    #[command(subcommand)]
    Airports(AirportsCommand),

    /// Manage collectors
    #[command(subcommand)]
    Collectors(CollectorsCommand),

    /// Show database status
    Status(StatusCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Log level selected by `-v`/`-q`.
    #[must_use]
    pub fn log_level(&self) -> tracing::level_filters::LevelFilter {
        crate::logging::level_for(self.verbose, self.quiet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn status_cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            verbose,
            quiet,
            command: Command::Status(StatusCommand { json: false }),
        }
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "radarlivre");
    }

    #[test]
    fn test_log_level() {
        use tracing::level_filters::LevelFilter;

        assert_eq!(status_cli(0, true).log_level(), LevelFilter::ERROR);
        assert_eq!(status_cli(0, false).log_level(), LevelFilter::INFO);
        assert_eq!(status_cli(1, false).log_level(), LevelFilter::DEBUG);
        assert_eq!(status_cli(2, false).log_level(), LevelFilter::TRACE);
    }

    #[test]
    fn test_cli_verify() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ingest_stdin() {
        let cli = Cli::try_parse_from(["radarlivre", "ingest", "-"]).unwrap();
        let Command::Ingest(cmd) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(cmd.input, PathBuf::from("-"));
    }

    #[test]
    fn test_parse_history_range() {
        let cli = Cli::try_parse_from([
            "radarlivre",
            "history",
            "E48D2A",
            "--since",
            "1000",
            "--until",
            "2000",
            "--format",
            "json",
        ])
        .unwrap();
        let Command::History(cmd) = cli.command else {
            panic!("expected history");
        };
        assert_eq!(cmd.airplane_id, "E48D2A");
        assert_eq!(cmd.since.as_deref(), Some("1000"));
        assert_eq!(cmd.format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_collector_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "radarlivre",
            "collectors",
            "register",
            "6f1c2b9e-8a4e-4d0b-9a57-2f4a0c1f3e11",
            "--latitude",
            "-3.7763",
            "--longitude",
            "-38.5326",
        ])
        .unwrap();
        let Command::Collectors(CollectorsCommand::Register {
            latitude,
            longitude,
            ..
        }) = cli.command
        else {
            panic!("expected collectors register");
        };
        assert_eq!(latitude, -3.7763);
        assert_eq!(longitude, -38.5326);
    }

    #[test]
    fn test_parse_flights_import() {
        let cli = Cli::try_parse_from(["radarlivre", "flights", "import", "flights.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Flights(FlightsCommand::Import { .. })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli =
            Cli::try_parse_from(["radarlivre", "-c", "/custom/config.toml", "status"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_with_verbose_and_quiet() {
        let cli = Cli::try_parse_from(["radarlivre", "-vv", "active"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["radarlivre", "-q", "status"]).unwrap();
        assert!(cli.quiet);
    }
}
