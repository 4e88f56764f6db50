use crate::{error::WatchError, metrics::WatchMetrics, poller::Update};
use futures::prelude::*;
use gateway_discovery_core::{Region, ServiceTopology, Snapshot};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Merges the reports of every region's poller into a single view.
///
/// Owned and updated by a single task; the latest topology of each region is
/// held in `view` and the last snapshot handed to watchers in `published`.
pub(crate) struct Aggregator {
    view: Snapshot,
    published: Option<Snapshot>,
    snapshots: mpsc::UnboundedSender<Snapshot>,
    errors: mpsc::UnboundedSender<WatchError>,
    metrics: WatchMetrics,
}

// === impl Aggregator ===

impl Aggregator {
    pub(crate) fn new(
        regions: &[Region],
        snapshots: mpsc::UnboundedSender<Snapshot>,
        errors: mpsc::UnboundedSender<WatchError>,
        metrics: WatchMetrics,
    ) -> Self {
        Self {
            view: Snapshot::pending(regions.iter().cloned()),
            published: None,
            snapshots,
            errors,
            metrics,
        }
    }

    /// Forwards updates until every poller has stopped.
    ///
    /// Once `drain` is signaled, further updates are discarded. Both output
    /// streams end when this returns.
    pub(crate) async fn run<S>(mut self, mut updates: S, drain: drain::Watch)
    where
        S: Stream<Item = Update> + Unpin,
    {
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        let mut release = None;
        loop {
            tokio::select! {
                biased;
                handle = &mut shutdown, if release.is_none() => {
                    debug!("Shutdown signaled; waiting for pollers to stop");
                    release = Some(handle);
                }
                update = updates.next() => match update {
                    Some(update) if release.is_none() => self.process(update),
                    Some(_) => trace!("Discarding update received during shutdown"),
                    None => break,
                },
            }
        }

        debug!("All pollers stopped");
        drop(self);
        drop(release);
    }

    fn process(&mut self, update: Update) {
        match update {
            Update::Changed(region, topology) => self.apply(&region, topology),
            Update::Failed(error) => {
                if self.errors.send(error).is_err() {
                    trace!("Error stream dropped");
                }
            }
        }
    }

    fn apply(&mut self, region: &str, topology: ServiceTopology) {
        if !self.view.set(region, topology) {
            warn!(%region, "Ignoring update for an unwatched region");
            return;
        }

        if self.published.as_ref() == Some(&self.view) {
            debug!(%region, "Merged snapshot unchanged");
            self.metrics.snapshot_suppressed();
            return;
        }

        let snapshot = self.view.clone();
        self.published = Some(snapshot.clone());
        self.metrics.snapshot_published();
        if self.snapshots.send(snapshot).is_err() {
            trace!("Snapshot stream dropped");
        }
    }
}
