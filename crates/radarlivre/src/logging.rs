//! Log output for radarlivre.
//!
//! Library code never installs a subscriber. An [`Aggregator`](crate::Aggregator)
//! is handed the span its components log under; the binary builds that span
//! with [`service_span`] and installs a stderr subscriber with [`install`].

use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing::{info_span, Span};
use tracing_subscriber::EnvFilter;

/// Level for the `radarlivre` target from the `-v` count and `-q` flag.
#[must_use]
pub fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::ERROR,
        (false, 0) => LevelFilter::INFO,
        (false, 1) => LevelFilter::DEBUG,
        (false, _) => LevelFilter::TRACE,
    }
}

/// Filter directive used when `RUST_LOG` is unset.
#[must_use]
pub fn directive(level: LevelFilter) -> String {
    format!("radarlivre={level}")
}

/// Install the stderr subscriber. `RUST_LOG` overrides `level` when set.
///
/// Returns `false` if a subscriber was already installed.
pub fn install(level: LevelFilter) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Root span for an aggregator working on the database at `database`.
#[must_use]
pub fn service_span(database: &Path) -> Span {
    info_span!("radarlivre", db = %database.display())
}
