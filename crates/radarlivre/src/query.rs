//! Read-side operations.
//!
//! [`QueryFacade`] answers "where is this airplane now", "where has it been"
//! and "what is flying", plus lookups on reference data. None of these
//! operations take the per-airplane locks; they read whatever the store last
//! committed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, Instrument, Span};
use uuid::Uuid;

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::model::{AirplaneState, Airport, Collector, Flight, Observation};
use crate::storage::{DurableStore, HistoryCursor, ReferenceData, StorageStats, TimeRange};

/// Queries over airplane states, observations and reference data.
#[derive(Debug, Clone)]
pub struct QueryFacade {
    store: Arc<dyn DurableStore>,
    reference: Arc<dyn ReferenceData>,
    page_size: usize,
    span: Span,
}

impl QueryFacade {
    /// Create a facade reading `page_size` observations at a time and
    /// logging under `span`.
    #[must_use]
    pub fn new(
        store: Arc<dyn DurableStore>,
        reference: Arc<dyn ReferenceData>,
        page_size: usize,
        span: Span,
    ) -> Self {
        Self {
            store,
            reference,
            page_size: page_size.max(1),
            span,
        }
    }

    /// The span this facade logs under.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Latest known state of one airplane.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the airplane has no state, or a store error.
    pub async fn current_state(&self, ctx: &CallContext, airplane_id: &str) -> Result<AirplaneState> {
        let key = airplane_id.trim().to_uppercase();
        let store = Arc::clone(&self.store);
        let lookup = key.clone();
        let state = ctx
            .run_blocking("get_state", move || store.get_state(&lookup))
            .instrument(self.span.clone())
            .await?;
        state.ok_or_else(|| {
            self.span
                .in_scope(|| debug!(airplane_id = %key, "No state for airplane"));
            Error::not_found(key)
        })
    }

    /// Observations of one airplane whose server timestamp falls in `range`.
    ///
    /// Nothing is read until the returned [`History`] is iterated.
    #[must_use]
    pub fn history(&self, airplane_id: &str, range: TimeRange) -> History {
        History {
            store: Arc::clone(&self.store),
            airplane_id: airplane_id.trim().to_uppercase(),
            range,
            page_size: self.page_size,
            span: self.span.clone(),
        }
    }

    /// States updated at or after `since` (epoch milliseconds), by airplane id.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn active_states(&self, ctx: &CallContext, since: i64) -> Result<Vec<AirplaneState>> {
        let store = Arc::clone(&self.store);
        ctx.run_blocking("states_since", move || store.states_since(since))
            .instrument(self.span.clone())
            .await
    }

    /// States updated within `window` of `now` (epoch milliseconds).
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn active_within(
        &self,
        ctx: &CallContext,
        now: i64,
        window: Duration,
    ) -> Result<Vec<AirplaneState>> {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        self.active_states(ctx, now.saturating_sub(window_ms).max(0))
            .await
    }

    /// Look up a flight by callsign.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn flight(&self, ctx: &CallContext, callsign: &str) -> Result<Option<Flight>> {
        let reference = Arc::clone(&self.reference);
        let callsign = callsign.trim().to_uppercase();
        ctx.run_blocking("lookup_flight", move || reference.lookup_flight(&callsign))
            .instrument(self.span.clone())
            .await
    }

    /// Look up an airport by prefix.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn airport(&self, ctx: &CallContext, prefix: &str) -> Result<Option<Airport>> {
        let reference = Arc::clone(&self.reference);
        let prefix = prefix.trim().to_uppercase();
        ctx.run_blocking("airport", move || reference.airport(&prefix))
            .instrument(self.span.clone())
            .await
    }

    /// Look up a registered collector.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn collector(&self, ctx: &CallContext, id: Uuid) -> Result<Option<Collector>> {
        let reference = Arc::clone(&self.reference);
        ctx.run_blocking("collector", move || reference.collector(id))
            .instrument(self.span.clone())
            .await
    }

    /// Store-wide counts.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub async fn stats(&self, ctx: &CallContext) -> Result<StorageStats> {
        let store = Arc::clone(&self.store);
        ctx.run_blocking("stats", move || store.stats())
            .instrument(self.span.clone())
            .await
    }
}

/// A lazily read, restartable sequence of observations.
///
/// Each call to [`History::iter`] starts a fresh scan from the beginning of
/// the range. Pages are fetched on demand using the `(server_timestamp, id)`
/// of the last observation seen, so observations inserted mid-scan never
/// cause duplicates. Iteration blocks on the store; from async code use
/// [`History::collect`].
#[derive(Debug, Clone)]
pub struct History {
    store: Arc<dyn DurableStore>,
    airplane_id: String,
    range: TimeRange,
    page_size: usize,
    span: Span,
}

impl History {
    /// The airplane this history belongs to.
    #[must_use]
    pub fn airplane_id(&self) -> &str {
        &self.airplane_id
    }

    /// The time range being scanned.
    #[must_use]
    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// Start a new scan.
    #[must_use]
    pub fn iter(&self) -> HistoryIter {
        HistoryIter {
            history: self.clone(),
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Read the whole range under `ctx`.
    ///
    /// # Errors
    ///
    /// Returns the first store error, or a timeout if the scan outlives the
    /// context deadline.
    pub async fn collect(&self, ctx: &CallContext) -> Result<Vec<Observation>> {
        self.collect_limited(ctx, usize::MAX).await
    }

    /// Read at most `limit` observations from the start of the range under
    /// `ctx`. Only the pages needed to produce them are fetched.
    ///
    /// # Errors
    ///
    /// Returns the first store error, or a timeout if the scan outlives the
    /// context deadline.
    pub async fn collect_limited(&self, ctx: &CallContext, limit: usize) -> Result<Vec<Observation>> {
        let history = self.clone();
        ctx.run_blocking("history", move || history.iter().take(limit).collect())
            .instrument(self.span.clone())
            .await
    }
}

impl IntoIterator for &History {
    type Item = Result<Observation>;
    type IntoIter = HistoryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over one scan of a [`History`].
#[derive(Debug)]
pub struct HistoryIter {
    history: History,
    cursor: Option<HistoryCursor>,
    buffer: VecDeque<Observation>,
    exhausted: bool,
}

impl Iterator for HistoryIter {
    type Item = Result<Observation>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(observation) = self.buffer.pop_front() {
            return Some(Ok(observation));
        }
        if self.exhausted {
            return None;
        }

        let h = &self.history;
        match h
            .store
            .observations_page(&h.airplane_id, h.range, self.cursor, h.page_size)
        {
            Ok(page) => {
                if page.len() < h.page_size {
                    self.exhausted = true;
                }
                if let Some(last) = page.last() {
                    self.cursor = HistoryCursor::after(last);
                }
                self.buffer.extend(page);
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::storage::conformance;
    use crate::storage::{MemoryStore, Storage};

    fn ctx() -> CallContext {
        CallContext::new(Duration::from_secs(5))
    }

    fn facade(store: &Arc<MemoryStore>, page_size: usize) -> QueryFacade {
        QueryFacade::new(store.clone(), store.clone(), page_size, Span::none())
    }

    fn timestamps(history: &History) -> Vec<i64> {
        history
            .iter()
            .map(|o| o.unwrap().server_timestamp)
            .collect()
    }

    #[tokio::test]
    async fn test_current_state_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = facade(&store, 10)
            .current_state(&ctx(), "ABC123")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_current_state_normalizes_id() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_state_if_newer(&conformance::state("ABC123", 1000, 10.0))
            .unwrap();
        let state = facade(&store, 10)
            .current_state(&ctx(), " abc123")
            .await
            .unwrap();
        assert_eq!(state.last_timestamp, 1000);
    }

    #[test]
    fn test_history_spans_pages_in_order() {
        let store = Arc::new(MemoryStore::new());
        for ts in [50, 10, 40, 20, 30, 20] {
            store
                .insert_observation(&conformance::observation(Some("ABC123"), ts))
                .unwrap();
        }
        store
            .insert_observation(&conformance::observation(Some("DEF456"), 25))
            .unwrap();

        let history = facade(&store, 2).history("ABC123", TimeRange::all());
        assert_eq!(timestamps(&history), vec![10, 20, 20, 30, 40, 50]);
    }

    #[test]
    fn test_history_range_is_half_open() {
        let store = Arc::new(MemoryStore::new());
        for ts in [10, 20, 30] {
            store
                .insert_observation(&conformance::observation(Some("ABC123"), ts))
                .unwrap();
        }
        let range = TimeRange::new(10, 30).unwrap();
        let history = facade(&store, 10).history("ABC123", range);
        assert_eq!(timestamps(&history), vec![10, 20]);
        assert_eq!(history.range(), range);
    }

    #[test]
    fn test_history_is_restartable() {
        let store = Arc::new(MemoryStore::new());
        for ts in 1..=5 {
            store
                .insert_observation(&conformance::observation(Some("ABC123"), ts))
                .unwrap();
        }
        let history = facade(&store, 2).history("ABC123", TimeRange::all());

        let first: Vec<i64> = history.iter().take(3).map(|o| o.unwrap().server_timestamp).collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(timestamps(&history), vec![1, 2, 3, 4, 5]);

        let mut seen = 0;
        for observation in &history {
            observation.unwrap();
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[test]
    fn test_history_sees_inserts_between_pages() {
        let store = Arc::new(MemoryStore::new());
        for ts in [10, 20, 30] {
            store
                .insert_observation(&conformance::observation(Some("ABC123"), ts))
                .unwrap();
        }
        let history = facade(&store, 2).history("ABC123", TimeRange::all());
        let mut iter = history.iter();
        assert_eq!(iter.next().unwrap().unwrap().server_timestamp, 10);
        assert_eq!(iter.next().unwrap().unwrap().server_timestamp, 20);

        // lands after the cursor, before the next page is read
        store
            .insert_observation(&conformance::observation(Some("ABC123"), 25))
            .unwrap();
        let rest: Vec<i64> = iter.map(|o| o.unwrap().server_timestamp).collect();
        assert_eq!(rest, vec![25, 30]);
    }

    #[tokio::test]
    async fn test_history_is_lazy() {
        #[derive(Debug, Default)]
        struct Counting {
            inner: MemoryStore,
            pages: AtomicUsize,
        }

        impl DurableStore for Counting {
            fn insert_observation(&self, o: &Observation) -> Result<i64> {
                self.inner.insert_observation(o)
            }
            fn observations_page(
                &self,
                airplane_id: &str,
                range: TimeRange,
                after: Option<HistoryCursor>,
                limit: usize,
            ) -> Result<Vec<Observation>> {
                self.pages.fetch_add(1, Ordering::SeqCst);
                self.inner.observations_page(airplane_id, range, after, limit)
            }
            fn get_state(&self, id: &str) -> Result<Option<AirplaneState>> {
                self.inner.get_state(id)
            }
            fn put_state_if_newer(&self, s: &AirplaneState) -> Result<bool> {
                self.inner.put_state_if_newer(s)
            }
            fn states_since(&self, since: i64) -> Result<Vec<AirplaneState>> {
                self.inner.states_since(since)
            }
            fn stats(&self) -> Result<StorageStats> {
                self.inner.stats()
            }
        }

        let store = Arc::new(Counting::default());
        for ts in 1..=10 {
            store
                .insert_observation(&conformance::observation(Some("ABC123"), ts))
                .unwrap();
        }
        let facade =
            QueryFacade::new(store.clone(), Arc::new(MemoryStore::new()), 3, Span::none());

        let history = facade.history("ABC123", TimeRange::all());
        assert_eq!(store.pages.load(Ordering::SeqCst), 0);

        let _ = history.iter().take(4).count();
        assert_eq!(store.pages.load(Ordering::SeqCst), 2);

        let first = history.collect_limited(&ctx(), 4).await.unwrap();
        let ts: Vec<i64> = first.iter().map(|o| o.server_timestamp).collect();
        assert_eq!(ts, vec![1, 2, 3, 4]);
        assert_eq!(store.pages.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_history_collect_from_sqlite() {
        let store = Arc::new(Storage::open_in_memory().unwrap());
        for ts in [30, 10, 20] {
            store
                .insert_observation(&conformance::observation(Some("ABC123"), ts))
                .unwrap();
        }
        let facade = QueryFacade::new(store.clone(), store.clone(), 2, Span::none());

        let observations = facade
            .history("abc123", TimeRange::all())
            .collect(&ctx())
            .await
            .unwrap();
        let ts: Vec<i64> = observations.iter().map(|o| o.server_timestamp).collect();
        assert_eq!(ts, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_unknown_airplane_history_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let observations = facade(&store, 10)
            .history("ABC123", TimeRange::all())
            .collect(&ctx())
            .await
            .unwrap();
        assert!(observations.is_empty());
    }

    #[tokio::test]
    async fn test_active_within_window() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_state_if_newer(&conformance::state("ABC123", 1_000, 0.0))
            .unwrap();
        store
            .put_state_if_newer(&conformance::state("DEF456", 9_000, 0.0))
            .unwrap();

        let active = facade(&store, 10)
            .active_within(&ctx(), 10_000, Duration::from_secs(5))
            .await
            .unwrap();
        let ids: Vec<&str> = active.iter().map(|s| s.airplane_id.as_str()).collect();
        assert_eq!(ids, vec!["DEF456"]);

        let all = facade(&store, 10).active_states(&ctx(), 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_reference_lookups() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_flight(&Flight {
                callsign: "GLO1234".to_string(),
                ..Flight::default()
            })
            .unwrap();
        store
            .put_airport(&Airport {
                prefix: "SBFZ".to_string(),
                ..Airport::default()
            })
            .unwrap();
        let id = Uuid::new_v4();
        store.put_collector(&Collector::new(id, 1.0, 2.0, 3)).unwrap();

        let facade = facade(&store, 10);
        assert!(facade.flight(&ctx(), "glo1234").await.unwrap().is_some());
        assert!(facade.airport(&ctx(), "sbfz").await.unwrap().is_some());
        assert!(facade.airport(&ctx(), "SBGR").await.unwrap().is_none());
        assert_eq!(facade.collector(&ctx(), id).await.unwrap().unwrap().last_seen, 3);
        assert_eq!(facade.stats(&ctx()).await.unwrap().flights, 1);
    }
}
