use gateway_discovery_core::{CatalogError, Region};
use std::{fmt, sync::Arc};

/// A failed catalog query in one region.
///
/// Errors are reported as values on the session's error stream; the region's
/// poller keeps retrying after a backoff.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{kind} in region {region} ({severity}, {failures} consecutive): {source}")]
pub struct WatchError {
    pub region: Region,
    pub kind: WatchErrorKind,
    pub severity: Severity,

    /// The number of consecutive failed queries in the region, including this
    /// one.
    pub failures: u32,

    source: Arc<CatalogError>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WatchErrorKind {
    /// The registry could not be reached.
    Unreachable,

    /// The registry answered with an error.
    QueryFailed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Transient,
    LikelyPersistent,
}

/// Errors that prevent a session from starting.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to enumerate registry regions: {0}")]
    Unavailable(#[source] CatalogError),

    #[error("no regions to watch")]
    NoRegions,
}

// === impl WatchError ===

impl WatchError {
    pub(crate) fn new(
        region: Region,
        error: CatalogError,
        failures: u32,
        persistent_after: u32,
    ) -> Self {
        let kind = match error {
            CatalogError::Unavailable(_) => WatchErrorKind::Unreachable,
            CatalogError::Timeout | CatalogError::Failed(_) => WatchErrorKind::QueryFailed,
        };
        let severity = if failures >= persistent_after {
            Severity::LikelyPersistent
        } else {
            Severity::Transient
        };
        Self {
            region,
            kind,
            severity,
            failures,
            source: Arc::new(error),
        }
    }

    pub fn catalog_error(&self) -> &CatalogError {
        &self.source
    }
}

// === impl WatchErrorKind ===

impl WatchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unreachable => "unreachable",
            Self::QueryFailed => "query_failed",
        }
    }
}

impl fmt::Display for WatchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => "registry unreachable".fmt(f),
            Self::QueryFailed => "query failed".fmt(f),
        }
    }
}

// === impl Severity ===

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => "transient".fmt(f),
            Self::LikelyPersistent => "likely persistent".fmt(f),
        }
    }
}
