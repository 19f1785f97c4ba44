//! In-memory store.
//!
//! State records live in a [`DashMap`] so that the conditional update of one
//! airplane only locks the shard holding its key. Observations are kept in
//! an append-only log grouped by airplane.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{AirplaneState, Airport, Collector, Flight, Observation};

use super::{DurableStore, HistoryCursor, ReferenceData, StorageStats, TimeRange};

/// Volatile store for tests and short-lived processes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    observations: RwLock<Vec<Observation>>,
    by_airplane: DashMap<String, Vec<usize>>,
    states: DashMap<String, AirplaneState>,
    flights: DashMap<String, Flight>,
    airports: DashMap<String, Airport>,
    collectors: DashMap<Uuid, Collector>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::internal("observation log lock poisoned")
}

impl DurableStore for MemoryStore {
    fn insert_observation(&self, observation: &Observation) -> Result<i64> {
        let mut log = self.observations.write().map_err(|_| poisoned())?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stored = observation.clone();
        stored.id = Some(id);

        let index = log.len();
        if let Some(airplane_id) = &stored.airplane_id {
            self.by_airplane
                .entry(airplane_id.clone())
                .or_default()
                .push(index);
        }
        log.push(stored);
        Ok(id)
    }

    fn observations_page(
        &self,
        airplane_id: &str,
        range: TimeRange,
        after: Option<HistoryCursor>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        // log before index, matching insert_observation
        let log = self.observations.read().map_err(|_| poisoned())?;
        let Some(indices) = self.by_airplane.get(airplane_id) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&Observation> = indices
            .iter()
            .map(|&i| &log[i])
            .filter(|o| range.contains(o.server_timestamp))
            .filter(|o| {
                let id = o.id.unwrap_or_default();
                after.map_or(true, |cursor| cursor.precedes(o.server_timestamp, id))
            })
            .collect();
        matching.sort_by_key(|o| (o.server_timestamp, o.id));

        Ok(matching.into_iter().take(limit).cloned().collect())
    }

    fn get_state(&self, airplane_id: &str) -> Result<Option<AirplaneState>> {
        Ok(self.states.get(airplane_id).map(|s| s.value().clone()))
    }

    fn put_state_if_newer(&self, state: &AirplaneState) -> Result<bool> {
        match self.states.entry(state.airplane_id.clone()) {
            Entry::Occupied(mut stored) => {
                if state.last_timestamp >= stored.get().last_timestamp {
                    stored.insert(state.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(state.clone());
                Ok(true)
            }
        }
    }

    fn states_since(&self, since: i64) -> Result<Vec<AirplaneState>> {
        let mut states: Vec<AirplaneState> = self
            .states
            .iter()
            .filter(|s| s.last_timestamp >= since)
            .map(|s| s.value().clone())
            .collect();
        states.sort_by(|a, b| a.airplane_id.cmp(&b.airplane_id));
        Ok(states)
    }

    fn stats(&self) -> Result<StorageStats> {
        let log = self.observations.read().map_err(|_| poisoned())?;

        let airplanes: BTreeSet<String> = self
            .states
            .iter()
            .map(|s| s.key().clone())
            .chain(self.by_airplane.iter().map(|e| e.key().clone()))
            .chain(self.flights.iter().filter_map(|f| f.airplane_id.clone()))
            .collect();

        Ok(StorageStats {
            observations: to_i64(log.len()),
            airplanes: to_i64(airplanes.len()),
            states: to_i64(self.states.len()),
            flights: to_i64(self.flights.len()),
            airports: to_i64(self.airports.len()),
            collectors: to_i64(self.collectors.len()),
            newest_observation: log.iter().map(|o| o.server_timestamp).max(),
            db_size_bytes: 0,
        })
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl ReferenceData for MemoryStore {
    fn lookup_flight(&self, callsign: &str) -> Result<Option<Flight>> {
        Ok(self.flights.get(callsign).map(|f| f.value().clone()))
    }

    fn put_flight(&self, flight: &Flight) -> Result<()> {
        self.flights.insert(flight.callsign.clone(), flight.clone());
        Ok(())
    }

    fn airport(&self, prefix: &str) -> Result<Option<Airport>> {
        Ok(self.airports.get(prefix).map(|a| a.value().clone()))
    }

    fn put_airport(&self, airport: &Airport) -> Result<()> {
        self.airports.insert(airport.prefix.clone(), airport.clone());
        Ok(())
    }

    fn collector(&self, id: Uuid) -> Result<Option<Collector>> {
        Ok(self.collectors.get(&id).map(|c| c.value().clone()))
    }

    fn put_collector(&self, collector: &Collector) -> Result<()> {
        self.collectors.insert(collector.id, collector.clone());
        Ok(())
    }

    fn touch_collector(&self, id: Uuid, data_timestamp: i64) -> Result<bool> {
        match self.collectors.get_mut(&id) {
            Some(mut collector) => {
                collector.last_data = collector.last_data.max(data_timestamp);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
