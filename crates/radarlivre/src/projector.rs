//! Projection of observations onto airplane states.
//!
//! Every persisted observation that names an airplane is folded into that
//! airplane's [`AirplaneState`], but only if it is at least as recent as the
//! state already stored. The check happens twice: once under the airplane's
//! [`KeyGuard`](crate::registry::KeyGuard) and again inside the store's
//! conditional write, so an older observation can never overwrite a newer
//! state even if another writer bypasses the registry.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn, Instrument, Span};

use crate::context::CallContext;
use crate::error::Result;
use crate::model::{AirplaneState, Flight, Observation};
use crate::registry::EntityRegistry;
use crate::storage::{DurableStore, ReferenceData};

/// What happened to the state when an observation was projected.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProjectionOutcome {
    /// The state was replaced with the projected one.
    Updated(AirplaneState),
    /// A newer state was already stored; nothing changed.
    Stale {
        /// The airplane whose state was kept.
        airplane_id: String,
        /// Timestamp of the stored state.
        stored_timestamp: i64,
        /// Timestamp of the rejected observation.
        observed_timestamp: i64,
    },
    /// The observation carries no airplane identifier.
    Unidentified,
}

impl ProjectionOutcome {
    /// Check if the state was written.
    #[must_use]
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated(_))
    }

    /// Check if the observation lost to a newer state.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }

    /// Short label used in logs and CLI output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Updated(_) => "updated",
            Self::Stale { .. } => "stale",
            Self::Unidentified => "unidentified",
        }
    }
}

/// Copy an observation's fields onto a state.
///
/// Position, velocity, heading and timestamp always come from the
/// observation. Flight labels come from `flight` when the callsign resolved,
/// and are left as they were otherwise.
pub fn apply_observation(state: &mut AirplaneState, observation: &Observation, flight: Option<&Flight>) {
    if let Some(flight) = flight {
        state.flight.clone_from(&flight.callsign);
        state.airline.clone_from(&flight.airline);
        state.airline_country.clone_from(&flight.airline_country);
    }
    state.position = observation.position;
    state.velocity = observation.velocity;
    state.ground_track_heading = observation.ground_track_heading;
    state.last_timestamp = observation.server_timestamp;
}

/// Folds observations into airplane states.
#[derive(Debug)]
pub struct StateProjector {
    registry: EntityRegistry,
    store: Arc<dyn DurableStore>,
    reference: Arc<dyn ReferenceData>,
    transient_retries: u32,
    span: Span,
}

impl StateProjector {
    /// Create a projector writing through `store` and logging under `span`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        reference: Arc<dyn ReferenceData>,
        transient_retries: u32,
        span: Span,
    ) -> Self {
        Self {
            registry: EntityRegistry::new(Arc::clone(&store)),
            store,
            reference,
            transient_retries,
            span,
        }
    }

    /// The span this projector logs under.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The per-airplane lock registry.
    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Project one persisted observation.
    ///
    /// # Errors
    ///
    /// Returns store errors. The observation itself stays persisted; a
    /// failed projection only means the state was not advanced.
    pub async fn project(
        &self,
        ctx: &CallContext,
        observation: &Observation,
    ) -> Result<ProjectionOutcome> {
        self.fold(ctx, observation)
            .instrument(self.span.clone())
            .await
    }

    async fn fold(&self, ctx: &CallContext, observation: &Observation) -> Result<ProjectionOutcome> {
        let Some(airplane_id) = observation.airplane_id.as_deref() else {
            return Ok(ProjectionOutcome::Unidentified);
        };

        let _guard = self.registry.lock(airplane_id).await;
        let mut state = self.registry.get_or_create(ctx, airplane_id).await?;

        if observation.server_timestamp < state.last_timestamp {
            debug!(
                airplane_id,
                stored = state.last_timestamp,
                observed = observation.server_timestamp,
                "Skipping out-of-order observation"
            );
            return Ok(ProjectionOutcome::Stale {
                airplane_id: airplane_id.to_string(),
                stored_timestamp: state.last_timestamp,
                observed_timestamp: observation.server_timestamp,
            });
        }

        let flight = match observation.flight_callsign.clone() {
            Some(callsign) => {
                let reference = Arc::clone(&self.reference);
                ctx.run_blocking("lookup_flight", move || reference.lookup_flight(&callsign))
                    .await?
            }
            None => None,
        };
        apply_observation(&mut state, observation, flight.as_ref());

        if self.write(ctx, &state).await? {
            debug!(
                airplane_id,
                last_timestamp = state.last_timestamp,
                "Airplane state updated"
            );
            return Ok(ProjectionOutcome::Updated(state));
        }

        // lost the conditional write to a writer outside this registry
        let store = Arc::clone(&self.store);
        let key = airplane_id.to_string();
        let stored_timestamp = ctx
            .run_blocking("get_state", move || store.get_state(&key))
            .await?
            .map_or(state.last_timestamp, |s| s.last_timestamp);
        Ok(ProjectionOutcome::Stale {
            airplane_id: airplane_id.to_string(),
            stored_timestamp,
            observed_timestamp: observation.server_timestamp,
        })
    }

    async fn write(&self, ctx: &CallContext, state: &AirplaneState) -> Result<bool> {
        let mut attempt = 0;
        loop {
            let store = Arc::clone(&self.store);
            let candidate = state.clone();
            match ctx
                .run_write("put_state_if_newer", move || {
                    store.put_state_if_newer(&candidate)
                })
                .await
            {
                Err(e) if e.is_transient() && attempt < self.transient_retries => {
                    attempt += 1;
                    warn!(
                        airplane_id = %state.airplane_id,
                        attempt,
                        error = %e,
                        "Retrying state write"
                    );
                }
                result => return result,
            }
        }
    }
}
