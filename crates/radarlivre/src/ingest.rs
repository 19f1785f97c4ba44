//! Observation ingest.
//!
//! A collector submits an [`ObservationPayload`]. The [`Validator`] turns it
//! into an [`Observation`] or rejects it with [`Error::Validation`];
//! [`Ingest::submit`] then persists the accepted observation before anything
//! else sees it.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Instrument, Span};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::IngestConfig;
use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::model::{Airport, Flight, Observation, Position, RawMessages, Velocity};
use crate::storage::{DurableStore, ReferenceData};

/// A decimal field as sent by a collector: a JSON number or a decimal string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecimalInput {
    /// A JSON number.
    Number(f64),
    /// A decimal string such as `"-3.7763"`.
    Text(String),
}

impl From<f64> for DecimalInput {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// An observation as submitted, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationPayload {
    /// Submitting collector (UUID string).
    pub collector_id: Option<String>,
    /// ICAO identifier of the airplane.
    pub airplane_id: Option<String>,
    /// Flight callsign.
    pub flight_callsign: Option<String>,
    /// Latitude in decimal degrees.
    pub latitude: Option<DecimalInput>,
    /// Longitude in decimal degrees.
    pub longitude: Option<DecimalInput>,
    /// Altitude.
    pub altitude: Option<DecimalInput>,
    /// Vertical rate.
    pub vertical_velocity: Option<DecimalInput>,
    /// Horizontal speed.
    pub horizontal_velocity: Option<DecimalInput>,
    /// Ground track heading in degrees.
    pub ground_track_heading: Option<DecimalInput>,
    /// Server receive time; assigned from the clock when absent.
    pub server_timestamp: Option<i64>,
    /// Collector send time.
    pub client_sent_timestamp: Option<i64>,
    /// Raw ADS-B frames.
    pub raw_messages: RawMessages,
}

/// Checks payloads and reference records against the ingest rules.
#[derive(Debug, Clone)]
pub struct Validator {
    airplane_id: Regex,
    callsign: Regex,
    max_raw_message_length: usize,
}

impl Validator {
    /// Build a validator from configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a pattern does not compile.
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::ConfigValidation {
                message: format!("invalid regex pattern for {name}: {e}"),
            })
        };
        Ok(Self {
            airplane_id: compile("airplane_id_pattern", &config.airplane_id_pattern)?,
            callsign: compile("callsign_pattern", &config.callsign_pattern)?,
            max_raw_message_length: config.max_raw_message_length,
        })
    }

    /// Validate a payload and stamp it with a server timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first offending field.
    pub fn validate(&self, payload: &ObservationPayload, clock: &dyn Clock) -> Result<Observation> {
        let collector_id = payload
            .collector_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Uuid::parse_str(s)
                    .map_err(|e| Error::validation("collector_id", format!("{s:?} is not a UUID: {e}")))
            })
            .transpose()?;

        let airplane_id = self.airplane_id(payload.airplane_id.as_deref())?;
        let flight_callsign = self.callsign(payload.flight_callsign.as_deref())?;

        let latitude = decimal("latitude", payload.latitude.as_ref())?;
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::validation(
                "latitude",
                format!("{latitude} is outside [-90, 90]"),
            ));
        }
        let longitude = decimal("longitude", payload.longitude.as_ref())?;
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::validation(
                "longitude",
                format!("{longitude} is outside [-180, 180]"),
            ));
        }

        let server_timestamp = match payload.server_timestamp {
            Some(ts) => non_negative("server_timestamp", ts)?,
            None => clock.now_millis(),
        };
        let client_sent_timestamp =
            non_negative("client_sent_timestamp", payload.client_sent_timestamp.unwrap_or(0))?;

        for (field, frame) in payload.raw_messages.iter() {
            if frame.chars().count() > self.max_raw_message_length {
                return Err(Error::validation(
                    field,
                    format!("longer than {} characters", self.max_raw_message_length),
                ));
            }
        }

        Ok(Observation {
            id: None,
            collector_id,
            airplane_id,
            flight_callsign,
            position: Position {
                latitude,
                longitude,
                altitude: decimal("altitude", payload.altitude.as_ref())?,
            },
            velocity: Velocity {
                vertical: decimal("vertical_velocity", payload.vertical_velocity.as_ref())?,
                horizontal: decimal("horizontal_velocity", payload.horizontal_velocity.as_ref())?,
            },
            ground_track_heading: decimal(
                "ground_track_heading",
                payload.ground_track_heading.as_ref(),
            )?,
            server_timestamp,
            client_sent_timestamp,
            raw_messages: payload.raw_messages.clone(),
        })
    }

    /// Normalise an airplane identifier; blank means absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the identifier does not match the pattern.
    pub fn airplane_id(&self, raw: Option<&str>) -> Result<Option<String>> {
        normalize("airplane_id", raw, &self.airplane_id)
    }

    /// Normalise a flight callsign; blank means absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the callsign does not match the pattern.
    pub fn callsign(&self, raw: Option<&str>) -> Result<Option<String>> {
        normalize("flight_callsign", raw, &self.callsign)
    }

    /// Normalise a flight record for import.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a missing or malformed callsign or airplane id.
    pub fn flight(&self, flight: &Flight) -> Result<Flight> {
        let callsign = self
            .callsign(Some(&flight.callsign))?
            .ok_or_else(|| Error::validation("flight_callsign", "must not be empty"))?;
        Ok(Flight {
            callsign,
            airplane_id: self.airplane_id(flight.airplane_id.as_deref())?,
            origin: blank_to_none(flight.origin.as_deref()),
            destination: blank_to_none(flight.destination.as_deref()),
            ..flight.clone()
        })
    }

    /// Check an airport record for import.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty prefix or an impossible location.
    pub fn airport(&self, airport: &Airport) -> Result<Airport> {
        let prefix = airport.prefix.trim().to_uppercase();
        if prefix.is_empty() {
            return Err(Error::validation("prefix", "must not be empty"));
        }
        self.location(airport.latitude, airport.longitude)?;
        Ok(Airport {
            prefix,
            ..airport.clone()
        })
    }

    /// Check that a coordinate pair lies on the globe.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the coordinate that is out of range.
    pub fn location(&self, latitude: f64, longitude: f64) -> Result<()> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::validation("latitude", "outside [-90, 90]"));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::validation("longitude", "outside [-180, 180]"));
        }
        Ok(())
    }
}

fn normalize(field: &'static str, raw: Option<&str>, pattern: &Regex) -> Result<Option<String>> {
    let Some(value) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let value = value.to_uppercase();
    if pattern.is_match(&value) {
        Ok(Some(value))
    } else {
        Err(Error::validation(
            field,
            format!("{value:?} does not match {}", pattern.as_str()),
        ))
    }
}

fn blank_to_none(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
}

/// Parse a decimal field; absent fields are zero.
fn decimal(field: &'static str, input: Option<&DecimalInput>) -> Result<f64> {
    let value = match input {
        None => return Ok(0.0),
        Some(DecimalInput::Number(n)) => *n,
        Some(DecimalInput::Text(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::validation(field, format!("{s:?} is not a decimal")))?,
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::validation(field, "not a finite decimal"))
    }
}

fn non_negative(field: &'static str, value: i64) -> Result<i64> {
    if value < 0 {
        Err(Error::validation(field, format!("{value} is negative")))
    } else {
        Ok(value)
    }
}

/// Validates and persists observations.
#[derive(Debug, Clone)]
pub struct Ingest {
    validator: Validator,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DurableStore>,
    reference: Arc<dyn ReferenceData>,
    require_registered_collector: bool,
    span: Span,
}

impl Ingest {
    /// Create an ingest stage that logs under `span`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the identifier patterns do not compile.
    pub fn new(
        config: &IngestConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn DurableStore>,
        reference: Arc<dyn ReferenceData>,
        span: Span,
    ) -> Result<Self> {
        Ok(Self {
            validator: Validator::new(config)?,
            clock,
            store,
            reference,
            require_registered_collector: config.require_registered_collector,
            span,
        })
    }

    /// The span this stage logs under.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The validator used by this stage.
    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// The clock used to stamp observations.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Validate and persist one observation.
    ///
    /// Returns the stored observation with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for rejected payloads (nothing is
    /// persisted) and store errors when persistence fails. There is no retry.
    pub async fn submit(
        &self,
        ctx: &CallContext,
        payload: &ObservationPayload,
    ) -> Result<Observation> {
        self.persist(ctx, payload)
            .instrument(self.span.clone())
            .await
    }

    async fn persist(&self, ctx: &CallContext, payload: &ObservationPayload) -> Result<Observation> {
        let mut observation = self.validator.validate(payload, self.clock.as_ref())?;

        if let (true, Some(collector_id)) =
            (self.require_registered_collector, observation.collector_id)
        {
            let reference = Arc::clone(&self.reference);
            let known = ctx
                .run_blocking("collector", move || reference.collector(collector_id))
                .await?
                .is_some();
            if !known {
                return Err(Error::validation(
                    "collector_id",
                    format!("collector {collector_id} is not registered"),
                ));
            }
        }

        let store = Arc::clone(&self.store);
        let record = observation.clone();
        let id = ctx
            .run_write("insert_observation", move || store.insert_observation(&record))
            .await?;
        observation.id = Some(id);
        debug!(
            id,
            airplane_id = observation.airplane_id.as_deref().unwrap_or("-"),
            server_timestamp = observation.server_timestamp,
            "Observation persisted"
        );

        if let Some(collector_id) = observation.collector_id {
            let reference = Arc::clone(&self.reference);
            let ts = observation.server_timestamp;
            match ctx
                .run_write("touch_collector", move || {
                    reference.touch_collector(collector_id, ts)
                })
                .await
            {
                Ok(true) => {}
                Ok(false) => debug!(%collector_id, "Observation from unregistered collector"),
                Err(e) => warn!(%collector_id, error = %e, "Failed to update collector heartbeat"),
            }
        }

        Ok(observation)
    }
}
