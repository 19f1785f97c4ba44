//! `SQLite` schema definitions for radarlivre.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the airplanes identity table.
pub const CREATE_AIRPLANES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS airplanes (
    icao TEXT PRIMARY KEY
)
";

/// SQL statement to create the observations table.
pub const CREATE_OBSERVATIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collector_id TEXT,
    airplane_id TEXT REFERENCES airplanes(icao),
    flight_callsign TEXT,
    latitude REAL NOT NULL DEFAULT 0,
    longitude REAL NOT NULL DEFAULT 0,
    altitude REAL NOT NULL DEFAULT 0,
    vertical_velocity REAL NOT NULL DEFAULT 0,
    horizontal_velocity REAL NOT NULL DEFAULT 0,
    ground_track_heading REAL NOT NULL DEFAULT 0,
    server_timestamp INTEGER NOT NULL,
    client_sent_timestamp INTEGER NOT NULL DEFAULT 0,
    message_identification TEXT NOT NULL DEFAULT '',
    message_position_even TEXT NOT NULL DEFAULT '',
    message_position_odd TEXT NOT NULL DEFAULT '',
    message_velocity TEXT NOT NULL DEFAULT ''
)
";

/// SQL statement to create an index for per-airplane history queries.
pub const CREATE_OBSERVATION_HISTORY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_observations_airplane_time
    ON observations(airplane_id, server_timestamp, id)
";

/// SQL statement to create the airplane state table.
pub const CREATE_AIRPLANE_STATES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS airplane_states (
    airplane_id TEXT PRIMARY KEY REFERENCES airplanes(icao),
    flight TEXT NOT NULL DEFAULT '',
    airline TEXT NOT NULL DEFAULT '',
    airline_country TEXT NOT NULL DEFAULT '',
    latitude REAL NOT NULL DEFAULT 0,
    longitude REAL NOT NULL DEFAULT 0,
    altitude REAL NOT NULL DEFAULT 0,
    vertical_velocity REAL NOT NULL DEFAULT 0,
    horizontal_velocity REAL NOT NULL DEFAULT 0,
    ground_track_heading REAL NOT NULL DEFAULT 0,
    last_timestamp INTEGER NOT NULL DEFAULT 0
)
";

/// SQL statement to create an index on `last_timestamp` for activity queries.
pub const CREATE_STATE_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_airplane_states_timestamp
    ON airplane_states(last_timestamp)
";

/// SQL statement to create the airports table.
pub const CREATE_AIRPORTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS airports (
    prefix TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    country TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL DEFAULT '',
    city TEXT NOT NULL DEFAULT '',
    latitude REAL NOT NULL DEFAULT 0,
    longitude REAL NOT NULL DEFAULT 0,
    kind TEXT NOT NULL DEFAULT ''
)
";

/// SQL statement to create the flights table.
pub const CREATE_FLIGHTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS flights (
    callsign TEXT PRIMARY KEY,
    airplane_id TEXT REFERENCES airplanes(icao),
    airline TEXT NOT NULL DEFAULT '',
    airline_country TEXT NOT NULL DEFAULT '',
    origin TEXT,
    destination TEXT
)
";

/// SQL statement to create the collectors table.
pub const CREATE_COLLECTORS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS collectors (
    id TEXT PRIMARY KEY,
    latitude REAL NOT NULL DEFAULT 0,
    longitude REAL NOT NULL DEFAULT 0,
    last_seen INTEGER NOT NULL DEFAULT 0,
    last_data INTEGER NOT NULL DEFAULT 0
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_AIRPLANES_TABLE,
    CREATE_OBSERVATIONS_TABLE,
    CREATE_OBSERVATION_HISTORY_INDEX,
    CREATE_AIRPLANE_STATES_TABLE,
    CREATE_STATE_TIMESTAMP_INDEX,
    CREATE_AIRPORTS_TABLE,
    CREATE_FLIGHTS_TABLE,
    CREATE_COLLECTORS_TABLE,
    CREATE_METADATA_TABLE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statements_not_empty() {
        assert!(!SCHEMA_STATEMENTS.is_empty());
        for stmt in SCHEMA_STATEMENTS {
            assert!(!stmt.trim().is_empty());
        }
    }

    #[test]
    fn test_states_keyed_by_airplane() {
        assert!(CREATE_AIRPLANE_STATES_TABLE.contains("airplane_id TEXT PRIMARY KEY"));
        assert!(CREATE_AIRPLANE_STATES_TABLE.contains("last_timestamp INTEGER NOT NULL"));
    }

    #[test]
    fn test_observations_keep_raw_messages() {
        for column in [
            "message_identification",
            "message_position_even",
            "message_position_odd",
            "message_velocity",
        ] {
            assert!(CREATE_OBSERVATIONS_TABLE.contains(column), "{column}");
        }
    }
}
