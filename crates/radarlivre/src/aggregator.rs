//! The aggregation service.
//!
//! [`Aggregator`] wires the ingest stage, the state projector and the query
//! facade over one store. A submission is persisted first and projected
//! second; the observation stays in the audit trail even when projection
//! fails or finds a newer state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Span};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::context::CallContext;
use crate::error::Result;
use crate::ingest::{Ingest, ObservationPayload};
use crate::model::{AirplaneState, Airport, Collector, Flight, Observation};
use crate::projector::{ProjectionOutcome, StateProjector};
use crate::query::QueryFacade;
use crate::storage::{DurableStore, ReferenceData};

/// Result of one accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    /// The persisted observation, with its assigned id.
    pub observation: Observation,
    /// What happened to the airplane's state.
    pub outcome: ProjectionOutcome,
}

/// Submission counters, shared with whoever reports on them.
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    updated: AtomicU64,
    stale: AtomicU64,
    unidentified: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    /// Observations persisted.
    pub accepted: u64,
    /// Payloads rejected by validation.
    pub rejected: u64,
    /// Projections that advanced a state.
    pub updated: u64,
    /// Projections that lost to a newer state.
    pub stale: u64,
    /// Observations without an airplane identifier.
    pub unidentified: u64,
}

impl IngestStats {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            unidentified: self.unidentified.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &ProjectionOutcome) {
        let counter = match outcome {
            ProjectionOutcome::Updated(_) => &self.updated,
            ProjectionOutcome::Stale { .. } => &self.stale,
            ProjectionOutcome::Unidentified => &self.unidentified,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Latest-state aggregator for ADS-B observations.
#[derive(Debug)]
pub struct Aggregator {
    ingest: Ingest,
    projector: StateProjector,
    query: QueryFacade,
    reference: Arc<dyn ReferenceData>,
    stats: Arc<IngestStats>,
    call_timeout: Duration,
    active_window: Duration,
    span: Span,
}

impl Aggregator {
    /// Build an aggregator over `store`.
    ///
    /// Logs go to `span`; the ingest stage, projector and query facade each
    /// log under a child span of it (`ingest`, `projector`, `query`).
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the ingest patterns do not compile.
    pub fn new<S>(
        config: &Config,
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        stats: Arc<IngestStats>,
        span: Span,
    ) -> Result<Self>
    where
        S: DurableStore + ReferenceData + 'static,
    {
        let durable: Arc<dyn DurableStore> = store.clone();
        let reference: Arc<dyn ReferenceData> = store;

        Ok(Self {
            ingest: Ingest::new(
                &config.ingest,
                clock,
                Arc::clone(&durable),
                Arc::clone(&reference),
                info_span!(parent: &span, "ingest"),
            )?,
            projector: StateProjector::new(
                Arc::clone(&durable),
                Arc::clone(&reference),
                config.store.transient_retries,
                info_span!(parent: &span, "projector"),
            ),
            query: QueryFacade::new(
                durable,
                Arc::clone(&reference),
                config.query.history_page_size,
                info_span!(parent: &span, "query"),
            ),
            reference,
            stats,
            call_timeout: config.call_timeout(),
            active_window: config.active_window(),
            span,
        })
    }

    /// A fresh call context with the configured store timeout.
    #[must_use]
    pub fn context(&self) -> CallContext {
        CallContext::new(self.call_timeout)
    }

    /// The span the aggregator logs under.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Read-side operations.
    #[must_use]
    pub fn query(&self) -> &QueryFacade {
        &self.query
    }

    /// Submission counters.
    #[must_use]
    pub fn stats(&self) -> &Arc<IngestStats> {
        &self.stats
    }

    /// The clock used to stamp observations.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.ingest.clock()
    }

    /// Current time from the aggregator's clock, in epoch milliseconds.
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.ingest.clock().now_millis()
    }

    /// Default window for [`Aggregator::active_now`].
    #[must_use]
    pub fn active_window(&self) -> Duration {
        self.active_window
    }

    /// Validate, persist and project one observation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`](crate::Error::Validation) for rejected
    /// payloads and store errors otherwise. If projection fails after the
    /// observation was persisted, the error is returned and the observation
    /// remains stored.
    pub async fn submit(&self, ctx: &CallContext, payload: &ObservationPayload) -> Result<Submission> {
        let observation = match self.ingest.submit(ctx, payload).await {
            Ok(observation) => observation,
            Err(e) => {
                if e.is_validation() {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    self.span.in_scope(|| debug!(error = %e, "Observation rejected"));
                }
                return Err(e);
            }
        };
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.projector.project(ctx, &observation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.span.in_scope(|| {
                    warn!(
                        id = observation.id,
                        airplane_id = observation.airplane_id.as_deref().unwrap_or("-"),
                        error = %e,
                        "Observation persisted but state not projected"
                    );
                });
                return Err(e);
            }
        };
        self.stats.record(&outcome);

        Ok(Submission {
            observation,
            outcome,
        })
    }

    /// States seen within the configured active window.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn active_now(&self, ctx: &CallContext) -> Result<Vec<AirplaneState>> {
        let now = self.now_millis();
        self.query.active_within(ctx, now, self.active_window).await
    }

    /// Register a collector, or refresh its location and `last_seen`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an impossible location, or a store error.
    pub async fn register_collector(
        &self,
        ctx: &CallContext,
        id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> Result<Collector> {
        self.ingest.validator().location(latitude, longitude)?;

        let now = self.now_millis();
        let reference = Arc::clone(&self.reference);
        let collector = ctx
            .run_write("register_collector", move || {
                let mut collector = Collector::new(id, latitude, longitude, now);
                if let Some(existing) = reference.collector(id)? {
                    collector.last_data = existing.last_data;
                }
                reference.put_collector(&collector)?;
                Ok(collector)
            })
            .await?;
        self.span
            .in_scope(|| info!(%id, latitude, longitude, "Collector registered"));
        Ok(collector)
    }

    /// Validate and store flight records. Returns the number stored.
    ///
    /// # Errors
    ///
    /// Returns the first validation or store error; records before it are kept.
    pub async fn import_flights(&self, ctx: &CallContext, flights: &[Flight]) -> Result<usize> {
        let flights = flights
            .iter()
            .map(|f| self.ingest.validator().flight(f))
            .collect::<Result<Vec<_>>>()?;
        let count = flights.len();
        let reference = Arc::clone(&self.reference);
        ctx.run_write("import_flights", move || {
            flights.iter().try_for_each(|f| reference.put_flight(f))
        })
        .await?;
        self.span.in_scope(|| info!(count, "Flights imported"));
        Ok(count)
    }

    /// Validate and store airport records. Returns the number stored.
    ///
    /// # Errors
    ///
    /// Returns the first validation or store error; records before it are kept.
    pub async fn import_airports(&self, ctx: &CallContext, airports: &[Airport]) -> Result<usize> {
        let airports = airports
            .iter()
            .map(|a| self.ingest.validator().airport(a))
            .collect::<Result<Vec<_>>>()?;
        let count = airports.len();
        let reference = Arc::clone(&self.reference);
        ctx.run_write("import_airports", move || {
            airports.iter().try_for_each(|a| reference.put_airport(a))
        })
        .await?;
        self.span.in_scope(|| info!(count, "Airports imported"));
        Ok(count)
    }
}
