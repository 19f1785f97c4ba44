//! Storage layer for radarlivre.
//!
//! [`DurableStore`] holds the observation audit trail and the per-airplane
//! state records; [`ReferenceData`] holds flights, airports and collectors.
//! Both are implemented by the `SQLite`-backed [`Storage`] and by the
//! in-memory [`MemoryStore`].
//!
//! Store methods are synchronous. Async callers go through
//! [`CallContext::run_blocking`](crate::context::CallContext::run_blocking).

pub mod memory;
pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    AirplaneState, Airport, Collector, Flight, Observation, Position, RawMessages, Velocity,
};

pub use memory::MemoryStore;

/// Default time `SQLite` waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Half-open interval `[start, end)` of server timestamps in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: i64,
    /// Exclusive upper bound.
    pub end: i64,
}

impl TimeRange {
    /// Create a range, rejecting an end before the start.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `end < start`.
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if end < start {
            return Err(Error::validation(
                "time_range",
                format!("end ({end}) is before start ({start})"),
            ));
        }
        Ok(Self { start, end })
    }

    /// A range covering every non-negative timestamp.
    #[must_use]
    pub fn all() -> Self {
        Self {
            start: 0,
            end: i64::MAX,
        }
    }

    /// Check if `timestamp` falls inside the range.
    #[must_use]
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Position in a history scan: the last observation already returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryCursor {
    /// Server timestamp of the last returned observation.
    pub server_timestamp: i64,
    /// Id of the last returned observation.
    pub id: i64,
}

impl HistoryCursor {
    /// Cursor positioned after `observation`.
    ///
    /// Returns `None` for observations that have not been persisted.
    #[must_use]
    pub fn after(observation: &Observation) -> Option<Self> {
        observation.id.map(|id| Self {
            server_timestamp: observation.server_timestamp,
            id,
        })
    }

    /// Check if the observation at `(server_timestamp, id)` sorts after this cursor.
    #[must_use]
    pub fn precedes(&self, server_timestamp: i64, id: i64) -> bool {
        (server_timestamp, id) > (self.server_timestamp, self.id)
    }
}

/// Observation log and airplane state records.
pub trait DurableStore: Send + Sync + std::fmt::Debug {
    /// Append an observation and return its assigned id.
    ///
    /// The observation is either fully persisted or not persisted at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot persist the record.
    fn insert_observation(&self, observation: &Observation) -> Result<i64>;

    /// Fetch up to `limit` observations of one airplane inside `range`,
    /// ordered by `(server_timestamp, id)` and strictly after `after`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn observations_page(
        &self,
        airplane_id: &str,
        range: TimeRange,
        after: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Observation>>;

    /// Fetch the current state of an airplane.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get_state(&self, airplane_id: &str) -> Result<Option<AirplaneState>>;

    /// Store `state` unless the stored record has a newer `last_timestamp`.
    ///
    /// Creation and the timestamp comparison happen atomically. Returns
    /// `false` when the stored record was newer and nothing was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn put_state_if_newer(&self, state: &AirplaneState) -> Result<bool>;

    /// All states with `last_timestamp >= since`, ordered by airplane id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn states_since(&self, since: i64) -> Result<Vec<AirplaneState>>;

    /// Record counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn stats(&self) -> Result<StorageStats>;
}

/// Flights, airports and collectors.
pub trait ReferenceData: Send + Sync + std::fmt::Debug {
    /// Look up a flight by callsign.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn lookup_flight(&self, callsign: &str) -> Result<Option<Flight>>;

    /// Create or replace a flight.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn put_flight(&self, flight: &Flight) -> Result<()>;

    /// Look up an airport by prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn airport(&self, prefix: &str) -> Result<Option<Airport>>;

    /// Create or replace an airport.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn put_airport(&self, airport: &Airport) -> Result<()>;

    /// Look up a collector.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn collector(&self, id: Uuid) -> Result<Option<Collector>>;

    /// Create or replace a collector.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn put_collector(&self, collector: &Collector) -> Result<()>;

    /// Advance a collector's `last_data` to `data_timestamp` if it is newer.
    ///
    /// Returns `false` if the collector is not registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn touch_collector(&self, id: Uuid, data_timestamp: i64) -> Result<bool>;
}

/// Statistics about the storage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of observations stored.
    pub observations: i64,
    /// Number of known airplanes.
    pub airplanes: i64,
    /// Number of airplane state records.
    pub states: i64,
    /// Number of flights.
    pub flights: i64,
    /// Number of airports.
    pub airports: i64,
    /// Number of registered collectors.
    pub collectors: i64,
    /// Largest observation server timestamp.
    pub newest_observation: Option<i64>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

const OBSERVATION_COLUMNS: &str = r"
    id, collector_id, airplane_id, flight_callsign,
    latitude, longitude, altitude,
    vertical_velocity, horizontal_velocity, ground_track_heading,
    server_timestamp, client_sent_timestamp,
    message_identification, message_position_even, message_position_odd, message_velocity
";

const STATE_COLUMNS: &str = r"
    airplane_id, flight, airline, airline_country,
    latitude, longitude, altitude,
    vertical_velocity, horizontal_velocity, ground_track_heading,
    last_timestamp
";

/// `SQLite`-backed store.
///
/// The connection is shared behind a mutex; `SQLite` itself admits a
/// single writer at a time.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    /// Initializes the schema if this is a new database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create a storage database with a custom busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open_with_busy_timeout(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("database connection mutex poisoned"))
    }

    fn count(conn: &Connection, table: &str) -> Result<i64> {
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Convert a database row to an Observation.
    fn row_to_observation(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
        let collector_str: Option<String> = row.get(1)?;
        let collector_id = collector_str.and_then(|s| match Uuid::parse_str(&s) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Unparseable collector id in database: {}", s);
                None
            }
        });

        Ok(Observation {
            id: Some(row.get(0)?),
            collector_id,
            airplane_id: row.get(2)?,
            flight_callsign: row.get(3)?,
            position: Position {
                latitude: row.get(4)?,
                longitude: row.get(5)?,
                altitude: row.get(6)?,
            },
            velocity: Velocity {
                vertical: row.get(7)?,
                horizontal: row.get(8)?,
            },
            ground_track_heading: row.get(9)?,
            server_timestamp: row.get(10)?,
            client_sent_timestamp: row.get(11)?,
            raw_messages: RawMessages {
                identification: row.get(12)?,
                position_even: row.get(13)?,
                position_odd: row.get(14)?,
                velocity: row.get(15)?,
            },
        })
    }

    /// Convert a database row to an `AirplaneState`.
    fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<AirplaneState> {
        Ok(AirplaneState {
            airplane_id: row.get(0)?,
            flight: row.get(1)?,
            airline: row.get(2)?,
            airline_country: row.get(3)?,
            position: Position {
                latitude: row.get(4)?,
                longitude: row.get(5)?,
                altitude: row.get(6)?,
            },
            velocity: Velocity {
                vertical: row.get(7)?,
                horizontal: row.get(8)?,
            },
            ground_track_heading: row.get(9)?,
            last_timestamp: row.get(10)?,
        })
    }

    fn row_to_flight(row: &rusqlite::Row) -> rusqlite::Result<Flight> {
        Ok(Flight {
            callsign: row.get(0)?,
            airplane_id: row.get(1)?,
            airline: row.get(2)?,
            airline_country: row.get(3)?,
            origin: row.get(4)?,
            destination: row.get(5)?,
        })
    }

    fn row_to_airport(row: &rusqlite::Row) -> rusqlite::Result<Airport> {
        Ok(Airport {
            prefix: row.get(0)?,
            name: row.get(1)?,
            country: row.get(2)?,
            state: row.get(3)?,
            city: row.get(4)?,
            latitude: row.get(5)?,
            longitude: row.get(6)?,
            kind: row.get(7)?,
        })
    }
}

impl DurableStore for Storage {
    fn insert_observation(&self, observation: &Observation) -> Result<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(airplane_id) = &observation.airplane_id {
            tx.execute(
                "INSERT OR IGNORE INTO airplanes (icao) VALUES (?1)",
                [airplane_id],
            )?;
        }

        tx.execute(
            r"
            INSERT INTO observations (
                collector_id, airplane_id, flight_callsign,
                latitude, longitude, altitude,
                vertical_velocity, horizontal_velocity, ground_track_heading,
                server_timestamp, client_sent_timestamp,
                message_identification, message_position_even, message_position_odd, message_velocity
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ",
            params![
                observation.collector_id.map(|id| id.to_string()),
                observation.airplane_id,
                observation.flight_callsign,
                observation.position.latitude,
                observation.position.longitude,
                observation.position.altitude,
                observation.velocity.vertical,
                observation.velocity.horizontal,
                observation.ground_track_heading,
                observation.server_timestamp,
                observation.client_sent_timestamp,
                observation.raw_messages.identification,
                observation.raw_messages.position_even,
                observation.raw_messages.position_odd,
                observation.raw_messages.velocity,
            ],
        )?;

        let id = tx.last_insert_rowid();
        tx.commit()?;
        debug!("Inserted observation with id {}", id);
        Ok(id)
    }

    fn observations_page(
        &self,
        airplane_id: &str,
        range: TimeRange,
        after: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r"
            SELECT {OBSERVATION_COLUMNS}
            FROM observations
            WHERE airplane_id = ?1
              AND server_timestamp >= ?2 AND server_timestamp < ?3
              AND (server_timestamp > ?4 OR (server_timestamp = ?4 AND id > ?5))
            ORDER BY server_timestamp ASC, id ASC
            LIMIT ?6
            "
        ))?;

        let (after_ts, after_id) =
            after.map_or((i64::MIN, i64::MIN), |c| (c.server_timestamp, c.id));
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let observations = stmt
            .query_map(
                params![
                    airplane_id,
                    range.start,
                    range.end,
                    after_ts,
                    after_id,
                    limit_i64
                ],
                Self::row_to_observation,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(observations)
    }

    fn get_state(&self, airplane_id: &str) -> Result<Option<AirplaneState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                &format!("SELECT {STATE_COLUMNS} FROM airplane_states WHERE airplane_id = ?1"),
                [airplane_id],
                Self::row_to_state,
            )
            .optional()?;
        Ok(state)
    }

    fn put_state_if_newer(&self, state: &AirplaneState) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO airplanes (icao) VALUES (?1)",
            [&state.airplane_id],
        )?;

        let affected = tx.execute(
            r"
            INSERT INTO airplane_states (
                airplane_id, flight, airline, airline_country,
                latitude, longitude, altitude,
                vertical_velocity, horizontal_velocity, ground_track_heading,
                last_timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(airplane_id) DO UPDATE SET
                flight = excluded.flight,
                airline = excluded.airline,
                airline_country = excluded.airline_country,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                altitude = excluded.altitude,
                vertical_velocity = excluded.vertical_velocity,
                horizontal_velocity = excluded.horizontal_velocity,
                ground_track_heading = excluded.ground_track_heading,
                last_timestamp = excluded.last_timestamp
            WHERE excluded.last_timestamp >= airplane_states.last_timestamp
            ",
            params![
                state.airplane_id,
                state.flight,
                state.airline,
                state.airline_country,
                state.position.latitude,
                state.position.longitude,
                state.position.altitude,
                state.velocity.vertical,
                state.velocity.horizontal,
                state.ground_track_heading,
                state.last_timestamp,
            ],
        )?;

        tx.commit()?;
        Ok(affected > 0)
    }

    fn states_since(&self, since: i64) -> Result<Vec<AirplaneState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r"
            SELECT {STATE_COLUMNS} FROM airplane_states
            WHERE last_timestamp >= ?1
            ORDER BY airplane_id ASC
            "
        ))?;

        let states = stmt
            .query_map([since], Self::row_to_state)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(states)
    }

    fn stats(&self) -> Result<StorageStats> {
        let conn = self.conn()?;

        let newest_observation: Option<i64> = conn.query_row(
            "SELECT MAX(server_timestamp) FROM observations",
            [],
            |row| row.get(0),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            observations: Self::count(&conn, "observations")?,
            airplanes: Self::count(&conn, "airplanes")?,
            states: Self::count(&conn, "airplane_states")?,
            flights: Self::count(&conn, "flights")?,
            airports: Self::count(&conn, "airports")?,
            collectors: Self::count(&conn, "collectors")?,
            newest_observation,
            db_size_bytes,
        })
    }
}

impl ReferenceData for Storage {
    fn lookup_flight(&self, callsign: &str) -> Result<Option<Flight>> {
        let conn = self.conn()?;
        let flight = conn
            .query_row(
                r"
                SELECT callsign, airplane_id, airline, airline_country, origin, destination
                FROM flights WHERE callsign = ?1
                ",
                [callsign],
                Self::row_to_flight,
            )
            .optional()?;
        Ok(flight)
    }

    fn put_flight(&self, flight: &Flight) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(airplane_id) = &flight.airplane_id {
            tx.execute(
                "INSERT OR IGNORE INTO airplanes (icao) VALUES (?1)",
                [airplane_id],
            )?;
        }

        tx.execute(
            r"
            INSERT INTO flights (callsign, airplane_id, airline, airline_country, origin, destination)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(callsign) DO UPDATE SET
                airplane_id = excluded.airplane_id,
                airline = excluded.airline,
                airline_country = excluded.airline_country,
                origin = excluded.origin,
                destination = excluded.destination
            ",
            params![
                flight.callsign,
                flight.airplane_id,
                flight.airline,
                flight.airline_country,
                flight.origin,
                flight.destination,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn airport(&self, prefix: &str) -> Result<Option<Airport>> {
        let conn = self.conn()?;
        let airport = conn
            .query_row(
                r"
                SELECT prefix, name, country, state, city, latitude, longitude, kind
                FROM airports WHERE prefix = ?1
                ",
                [prefix],
                Self::row_to_airport,
            )
            .optional()?;
        Ok(airport)
    }

    fn put_airport(&self, airport: &Airport) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO airports (prefix, name, country, state, city, latitude, longitude, kind)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(prefix) DO UPDATE SET
                name = excluded.name,
                country = excluded.country,
                state = excluded.state,
                city = excluded.city,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                kind = excluded.kind
            ",
            params![
                airport.prefix,
                airport.name,
                airport.country,
                airport.state,
                airport.city,
                airport.latitude,
                airport.longitude,
                airport.kind,
            ],
        )?;
        Ok(())
    }

    fn collector(&self, id: Uuid) -> Result<Option<Collector>> {
        let conn = self.conn()?;
        let collector = conn
            .query_row(
                r"
                SELECT latitude, longitude, last_seen, last_data
                FROM collectors WHERE id = ?1
                ",
                [id.to_string()],
                |row| {
                    Ok(Collector {
                        id,
                        latitude: row.get(0)?,
                        longitude: row.get(1)?,
                        last_seen: row.get(2)?,
                        last_data: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(collector)
    }

    fn put_collector(&self, collector: &Collector) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r"
            INSERT INTO collectors (id, latitude, longitude, last_seen, last_data)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                last_seen = excluded.last_seen,
                last_data = excluded.last_data
            ",
            params![
                collector.id.to_string(),
                collector.latitude,
                collector.longitude,
                collector.last_seen,
                collector.last_data,
            ],
        )?;
        Ok(())
    }

    fn touch_collector(&self, id: Uuid, data_timestamp: i64) -> Result<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE collectors SET last_data = MAX(last_data, ?2) WHERE id = ?1",
            params![id.to_string(), data_timestamp],
        )?;
        Ok(affected > 0)
    }
}
