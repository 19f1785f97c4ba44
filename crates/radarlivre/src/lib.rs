//! `radarlivre` - Latest-state aggregator for ADS-B observations
//!
//! Ground collectors submit decoded ADS-B observations. Each accepted
//! observation is kept in an append-only audit trail and folded into a
//! single latest-known state per airplane, so that a late-arriving
//! observation never rolls an airplane back in time.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod aggregator;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod projector;
pub mod query;
pub mod registry;
pub mod storage;

pub use aggregator::{Aggregator, IngestStats, IngestStatsSnapshot, Submission};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use context::CallContext;
pub use error::{Error, Result};
pub use ingest::{DecimalInput, ObservationPayload};
pub use model::{AirplaneState, Airport, Collector, Flight, Observation};
pub use projector::ProjectionOutcome;
pub use query::{History, QueryFacade};
pub use storage::{DurableStore, MemoryStore, ReferenceData, Storage, StorageStats, TimeRange};
