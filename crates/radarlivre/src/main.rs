//! `radarlivre` - CLI for the radarlivre aggregator
//!
//! This binary ingests observation files, manages reference data and
//! queries the latest airplane states stored in the local database.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use radarlivre::cli::{
    parse_timestamp, ActiveCommand, AirportsCommand, Cli, CollectorsCommand, Command,
    ConfigCommand, FlightsCommand, HistoryCommand, IngestCommand, OutputFormat, StateCommand,
};
use radarlivre::logging;
use radarlivre::{
    Aggregator, AirplaneState, Airport, CallContext, Config, Flight, IngestStats,
    ObservationPayload, Storage, SystemClock, TimeRange,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::install(cli.log_level());

    // Validation must report on a broken file instead of failing to start
    if let Command::Config(ConfigCommand::Validate { file }) = cli.command {
        return validate_config(file.or(cli.config));
    }

    let config = Config::load_from(cli.config.clone())?;

    // Commands that never touch the database
    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        command => {
            let database = config.database_path();
            let storage = Arc::new(
                Storage::open_with_busy_timeout(&database, config.busy_timeout())
                    .with_context(|| format!("opening database {}", database.display()))?,
            );
            let aggregator = Aggregator::new(
                &config,
                Arc::clone(&storage),
                Arc::new(SystemClock),
                Arc::new(IngestStats::new()),
                logging::service_span(&database),
            )?;
            run(&config, &aggregator, &storage, command).await
        }
    }
}

async fn run(
    config: &Config,
    aggregator: &Aggregator,
    storage: &Storage,
    command: Command,
) -> anyhow::Result<()> {
    let ctx = aggregator.context();
    match command {
        Command::Ingest(cmd) => handle_ingest(aggregator, &cmd).await,
        Command::State(cmd) => handle_state(aggregator, &ctx, &cmd).await,
        Command::History(cmd) => handle_history(aggregator, &ctx, &cmd).await,
        Command::Active(cmd) => handle_active(aggregator, &ctx, &cmd).await,
        Command::Flights(cmd) => handle_flights(aggregator, &ctx, cmd).await,
        Command::Airports(cmd) => handle_airports(aggregator, &ctx, cmd).await,
        Command::Collectors(cmd) => handle_collectors(aggregator, &ctx, cmd).await,
        Command::Status(cmd) => handle_status(aggregator, storage, &ctx, cmd.json).await,
        Command::Config(cmd) => handle_config(config, cmd),
    }
}

async fn open_input(path: &Path) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

async fn handle_ingest(aggregator: &Aggregator, cmd: &IngestCommand) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping ingest");
            on_signal.cancel();
        }
    });
    // The token only stops reading; a submission in progress always finishes
    let ctx = aggregator.context();

    let mut lines = open_input(&cmd.input).await?.lines();
    let mut line_no = 0usize;
    let mut failed = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let result = match serde_json::from_str::<ObservationPayload>(&line) {
            Ok(payload) => aggregator.submit(&ctx, &payload).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            failed += 1;
            if cmd.strict {
                bail!("line {line_no}: {e}");
            }
            warn!(line = line_no, error = %e, "Skipping observation");
        }
    }

    let stats = aggregator.stats().snapshot();
    info!(lines = line_no, failed, "Ingest finished");
    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Plain => {
            println!("Accepted:      {}", stats.accepted);
            println!("Rejected:      {}", stats.rejected);
            println!("Updated:       {}", stats.updated);
            println!("Stale:         {}", stats.stale);
            println!("Unidentified:  {}", stats.unidentified);
            if failed > stats.rejected {
                println!("Other errors:  {}", failed - stats.rejected);
            }
        }
    }
    Ok(())
}

fn print_state(state: &AirplaneState) {
    println!(
        "{}  {:<8} {:>10.4} {:>10.4} {:>8.0}  {:>6.1}°  {:>6.0} kt  {}",
        state.airplane_id,
        if state.flight.is_empty() { "-" } else { &state.flight },
        state.position.latitude,
        state.position.longitude,
        state.position.altitude,
        state.ground_track_heading,
        state.velocity.horizontal,
        state.last_seen(),
    );
}

async fn handle_state(
    aggregator: &Aggregator,
    ctx: &CallContext,
    cmd: &StateCommand,
) -> anyhow::Result<()> {
    let state = aggregator
        .query()
        .current_state(ctx, &cmd.airplane_id)
        .await?;
    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&state)?),
        OutputFormat::Plain => {
            println!("Airplane:        {}", state.airplane_id);
            println!("Flight:          {}", state.flight);
            println!("Airline:         {} ({})", state.airline, state.airline_country);
            println!(
                "Position:        {:.5}, {:.5} at {:.0}",
                state.position.latitude, state.position.longitude, state.position.altitude
            );
            println!(
                "Velocity:        {:.0} horizontal, {:.0} vertical",
                state.velocity.horizontal, state.velocity.vertical
            );
            println!("Heading:         {:.1}", state.ground_track_heading);
            println!("Last seen:       {}", state.last_seen());
        }
    }
    Ok(())
}

async fn handle_history(
    aggregator: &Aggregator,
    ctx: &CallContext,
    cmd: &HistoryCommand,
) -> anyhow::Result<()> {
    let start = cmd.since.as_deref().map(parse_timestamp).transpose()?.unwrap_or(0);
    let end = cmd
        .until
        .as_deref()
        .map(parse_timestamp)
        .transpose()?
        .unwrap_or(i64::MAX);
    let range = TimeRange::new(start, end)?;

    let history = aggregator.query().history(&cmd.airplane_id, range);
    let observations = match cmd.limit {
        Some(limit) => history.collect_limited(ctx, limit).await?,
        None => history.collect(ctx).await?,
    };

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&observations)?),
        OutputFormat::Plain => {
            for o in &observations {
                println!(
                    "{:>6}  {}  {:>10.4} {:>10.4} {:>8.0}  {}",
                    o.id.unwrap_or_default(),
                    o.server_timestamp,
                    o.position.latitude,
                    o.position.longitude,
                    o.position.altitude,
                    o.flight_callsign.as_deref().unwrap_or("-"),
                );
            }
            println!("{} observation(s)", observations.len());
        }
    }
    Ok(())
}

async fn handle_active(
    aggregator: &Aggregator,
    ctx: &CallContext,
    cmd: &ActiveCommand,
) -> anyhow::Result<()> {
    let states = match cmd.within_secs {
        Some(secs) => {
            let now = aggregator.now_millis();
            aggregator
                .query()
                .active_within(ctx, now, Duration::from_secs(secs))
                .await?
        }
        None => aggregator.active_now(ctx).await?,
    };

    match cmd.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&states)?),
        OutputFormat::Plain => {
            states.iter().for_each(print_state);
            println!("{} active airplane(s)", states.len());
        }
    }
    Ok(())
}

fn read_json_array<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

async fn handle_flights(
    aggregator: &Aggregator,
    ctx: &CallContext,
    cmd: FlightsCommand,
) -> anyhow::Result<()> {
    match cmd {
        FlightsCommand::Import { file } => {
            let flights: Vec<Flight> = read_json_array(&file)?;
            let count = aggregator.import_flights(ctx, &flights).await?;
            println!("Imported {count} flight(s)");
        }
        FlightsCommand::Show { callsign } => match aggregator.query().flight(ctx, &callsign).await? {
            Some(flight) => println!("{}", serde_json::to_string_pretty(&flight)?),
            None => bail!("no flight with callsign {callsign}"),
        },
    }
    Ok(())
}

async fn handle_airports(
    aggregator: &Aggregator,
    ctx: &CallContext,
    cmd: AirportsCommand,
) -> anyhow::Result<()> {
    match cmd {
        AirportsCommand::Import { file } => {
            let airports: Vec<Airport> = read_json_array(&file)?;
            let count = aggregator.import_airports(ctx, &airports).await?;
            println!("Imported {count} airport(s)");
        }
        AirportsCommand::Show { prefix } => match aggregator.query().airport(ctx, &prefix).await? {
            Some(airport) => println!("{}", serde_json::to_string_pretty(&airport)?),
            None => bail!("no airport with prefix {prefix}"),
        },
    }
    Ok(())
}

async fn handle_collectors(
    aggregator: &Aggregator,
    ctx: &CallContext,
    cmd: CollectorsCommand,
) -> anyhow::Result<()> {
    match cmd {
        CollectorsCommand::Register {
            id,
            latitude,
            longitude,
        } => {
            let collector = aggregator
                .register_collector(ctx, id, latitude, longitude)
                .await?;
            println!("Registered {} at {}", collector.id, collector.last_seen_date());
        }
        CollectorsCommand::Show { id } => match aggregator.query().collector(ctx, id).await? {
            Some(collector) => {
                println!("Collector:   {}", collector.id);
                println!(
                    "Location:    {:.5}, {:.5}",
                    collector.latitude, collector.longitude
                );
                println!("Last seen:   {}", collector.last_seen_date());
                println!("Last data:   {}", collector.last_data);
            }
            None => bail!("collector {id} is not registered"),
        },
    }
    Ok(())
}

async fn handle_status(
    aggregator: &Aggregator,
    storage: &Storage,
    ctx: &CallContext,
    json: bool,
) -> anyhow::Result<()> {
    let stats = aggregator.query().stats(ctx).await?;
    if json {
        let status = serde_json::json!({
            "database_path": storage.path(),
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("radarlivre status");
        println!("-----------------");
        println!("Database:      {}", storage.path().display());
        println!("Size:          {} bytes", stats.db_size_bytes);
        println!("Observations:  {}", stats.observations);
        println!("Airplanes:     {}", stats.airplanes);
        println!("States:        {}", stats.states);
        println!("Flights:       {}", stats.flights);
        println!("Airports:      {}", stats.airports);
        println!("Collectors:    {}", stats.collectors);
        match stats.newest_observation {
            Some(ts) => println!("Newest:        {ts}"),
            None => println!("Newest:        -"),
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Busy timeout (ms):  {}", config.storage.busy_timeout_ms);
                println!();
                println!("[Ingest]");
                println!("  Airplane id:        {}", config.ingest.airplane_id_pattern);
                println!("  Callsign:           {}", config.ingest.callsign_pattern);
                println!(
                    "  Max raw message:    {}",
                    config.ingest.max_raw_message_length
                );
                println!(
                    "  Registered only:    {}",
                    config.ingest.require_registered_collector
                );
                println!();
                println!("[Store]");
                println!("  Call timeout (ms):  {}", config.store.call_timeout_ms);
                println!("  Transient retries:  {}", config.store.transient_retries);
                println!();
                println!("[Query]");
                println!("  History page size:  {}", config.query.history_page_size);
                println!("  Active window (s):  {}", config.query.active_window_secs);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => return validate_config(file),
    }
    Ok(())
}

fn validate_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    Config::load_from(Some(path.clone()))
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    println!("Configuration is valid.");
    Ok(())
}
