//! Core record types for radarlivre.
//!
//! Observations are the immutable audit trail submitted by collectors;
//! [`AirplaneState`] is the single mutable latest-known record per airplane.
//! Flights, airports and collectors are reference data maintained outside
//! the aggregation path.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Geodetic position of an airplane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Altitude as reported by the transponder.
    pub altitude: f64,
}

/// Velocity components of an airplane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    /// Vertical rate.
    pub vertical: f64,
    /// Horizontal (ground) speed.
    pub horizontal: f64,
}

/// The raw ADS-B frames an observation was decoded from.
///
/// Each frame is kept as the opaque string the collector sent; missing
/// frames are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMessages {
    /// Aircraft identification message.
    pub identification: String,
    /// Even CPR airborne position message.
    pub position_even: String,
    /// Odd CPR airborne position message.
    pub position_odd: String,
    /// Airborne velocity message.
    pub velocity: String,
}

impl RawMessages {
    /// Iterate over `(name, frame)` pairs in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("raw_messages.identification", self.identification.as_str()),
            ("raw_messages.position_even", self.position_even.as_str()),
            ("raw_messages.position_odd", self.position_odd.as_str()),
            ("raw_messages.velocity", self.velocity.as_str()),
        ]
        .into_iter()
    }

    /// Check if no frame was supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, frame)| frame.is_empty())
    }
}

/// A validated observation of one airplane by one collector.
///
/// Observations are never mutated once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Identity assigned by the store (absent until persisted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// The collector that submitted this observation, if not anonymous.
    pub collector_id: Option<Uuid>,

    /// ICAO identifier of the observed airplane, if it could be matched.
    pub airplane_id: Option<String>,

    /// Callsign of the associated flight, if any.
    pub flight_callsign: Option<String>,

    /// Reported position.
    pub position: Position,

    /// Reported velocity.
    pub velocity: Velocity,

    /// Ground track heading in degrees.
    pub ground_track_heading: f64,

    /// Server receive time in milliseconds since the epoch.
    pub server_timestamp: i64,

    /// Collector send time in milliseconds since the epoch.
    pub client_sent_timestamp: i64,

    /// Raw frames the observation was decoded from.
    pub raw_messages: RawMessages,
}

/// Latest known state of one airplane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirplaneState {
    /// ICAO identifier (primary key).
    pub airplane_id: String,
    /// Callsign of the flight last associated with this airplane.
    pub flight: String,
    /// Airline operating that flight.
    pub airline: String,
    /// Country of that airline.
    pub airline_country: String,
    /// Last known position.
    pub position: Position,
    /// Last known velocity.
    pub velocity: Velocity,
    /// Last known ground track heading.
    pub ground_track_heading: f64,
    /// Server timestamp of the observation that produced this state.
    pub last_timestamp: i64,
}

impl AirplaneState {
    /// Create a zero-valued state for an airplane that has not been seen yet.
    #[must_use]
    pub fn new(airplane_id: impl Into<String>) -> Self {
        Self {
            airplane_id: airplane_id.into(),
            flight: String::new(),
            airline: String::new(),
            airline_country: String::new(),
            position: Position::default(),
            velocity: Velocity::default(),
            ground_track_heading: 0.0,
            last_timestamp: 0,
        }
    }

    /// Render `last_timestamp` as `dd-mm-YYYY HH:MM:SS` UTC.
    #[must_use]
    pub fn last_seen(&self) -> String {
        format_millis(self.last_timestamp, "%d-%m-%Y %H:%M:%S")
    }
}

/// A scheduled flight, used to label airplane states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flight {
    /// Flight callsign (primary key).
    pub callsign: String,
    /// Airplane currently assigned to the flight.
    pub airplane_id: Option<String>,
    /// Operating airline.
    pub airline: String,
    /// Country of the operating airline.
    pub airline_country: String,
    /// Prefix of the origin airport.
    pub origin: Option<String>,
    /// Prefix of the destination airport.
    pub destination: Option<String>,
}

/// An airport referenced by flights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Airport {
    /// Airport prefix (primary key).
    pub prefix: String,
    /// Display name.
    pub name: String,
    /// Country.
    pub country: String,
    /// State or province.
    pub state: String,
    /// City.
    pub city: String,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Free-form airport category.
    pub kind: String,
}

/// A registered ground station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collector {
    /// Collector identity.
    pub id: Uuid,
    /// Station latitude.
    pub latitude: f64,
    /// Station longitude.
    pub longitude: f64,
    /// Last registration or heartbeat, in milliseconds since the epoch.
    pub last_seen: i64,
    /// Server timestamp of the last observation submitted, in milliseconds.
    pub last_data: i64,
}

impl Collector {
    /// Create a collector registered at the given time.
    #[must_use]
    pub fn new(id: Uuid, latitude: f64, longitude: f64, now: i64) -> Self {
        Self {
            id,
            latitude,
            longitude,
            last_seen: now,
            last_data: 0,
        }
    }

    /// Render `last_seen` as `dd/mm/YYYY HH:MM:SS` UTC.
    #[must_use]
    pub fn last_seen_date(&self) -> String {
        format_millis(self.last_seen, "%d/%m/%Y %H:%M:%S")
    }
}

/// Format epoch milliseconds with a chrono format string, truncating to seconds.
fn format_millis(millis: i64, fmt: &str) -> String {
    chrono::DateTime::from_timestamp(millis.div_euclid(1000), 0)
        .map_or_else(|| millis.to_string(), |dt| dt.format(fmt).to_string())
}
