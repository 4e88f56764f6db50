use crate::error::WatchErrorKind;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::atomic::AtomicU64;
use tokio::time::Duration;

/// Metrics describing a watch session.
///
/// A default (unregistered) instance records into metrics that are never
/// exported.
#[derive(Clone, Debug, Default)]
pub struct WatchMetrics {
    queries: Family<RegionLabels, Counter>,
    query_failures: Family<FailureLabels, Counter>,
    topology_changes: Family<RegionLabels, Counter>,
    last_contact: Family<RegionLabels, Gauge<f64, AtomicU64>>,
    snapshots_published: Counter,
    snapshots_suppressed: Counter,
}

/// Handles to a single region's metrics.
#[derive(Clone, Debug)]
pub(crate) struct RegionMetrics {
    region: String,
    queries: Counter,
    topology_changes: Counter,
    last_contact: Gauge<f64, AtomicU64>,
    query_failures: Family<FailureLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct RegionLabels {
    region: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct FailureLabels {
    region: String,
    kind: &'static str,
}

// === impl WatchMetrics ===

impl WatchMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let metrics = Self::default();

        reg.register(
            "queries",
            "Count of catalog queries completed, by region",
            metrics.queries.clone(),
        );
        reg.register(
            "query_failures",
            "Count of failed catalog queries, by region and failure kind",
            metrics.query_failures.clone(),
        );
        reg.register(
            "topology_changes",
            "Count of changes observed in a region's service topology",
            metrics.topology_changes.clone(),
        );
        reg.register(
            "last_contact_seconds",
            "Time since the serving registry node last contacted its leader",
            metrics.last_contact.clone(),
        );
        reg.register(
            "snapshots_published",
            "Count of merged snapshots published to watchers",
            metrics.snapshots_published.clone(),
        );
        reg.register(
            "snapshots_suppressed",
            "Count of merged snapshots dropped as duplicates of the last published snapshot",
            metrics.snapshots_suppressed.clone(),
        );

        metrics
    }

    pub(crate) fn region(&self, region: &str) -> RegionMetrics {
        let labels = RegionLabels {
            region: region.to_string(),
        };
        RegionMetrics {
            region: region.to_string(),
            queries: self.queries.get_or_create(&labels).clone(),
            topology_changes: self.topology_changes.get_or_create(&labels).clone(),
            last_contact: self.last_contact.get_or_create(&labels).clone(),
            query_failures: self.query_failures.clone(),
        }
    }

    pub(crate) fn snapshot_published(&self) {
        self.snapshots_published.inc();
    }

    pub(crate) fn snapshot_suppressed(&self) {
        self.snapshots_suppressed.inc();
    }

    pub fn snapshots_published(&self) -> u64 {
        self.snapshots_published.get()
    }

    pub fn snapshots_suppressed(&self) -> u64 {
        self.snapshots_suppressed.get()
    }
}

// === impl RegionMetrics ===

impl RegionMetrics {
    pub(crate) fn query_succeeded(&self, last_contact: Duration) {
        self.queries.inc();
        self.last_contact.set(last_contact.as_secs_f64());
    }

    pub(crate) fn query_timed_out(&self) {
        self.queries.inc();
    }

    pub(crate) fn query_failed(&self, kind: WatchErrorKind) {
        self.queries.inc();
        self.query_failures
            .get_or_create(&FailureLabels {
                region: self.region.clone(),
                kind: kind.as_str(),
            })
            .inc();
    }

    pub(crate) fn topology_changed(&self) {
        self.topology_changes.inc();
    }
}
