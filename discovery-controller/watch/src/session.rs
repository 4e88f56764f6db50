use crate::{
    aggregate::Aggregator,
    error::{SetupError, WatchError},
    metrics::WatchMetrics,
    poller::{PollParams, RegionPoller},
};
use futures::{prelude::*, stream::SelectAll};
use gateway_discovery_core::{ConsistencyMode, DiscoverCatalog, Region, Snapshot};
use std::{collections::BTreeSet, fmt, pin::Pin, sync::Arc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, info_span, warn, Instrument};

pub type SnapshotStream = Pin<Box<dyn Stream<Item = Snapshot> + Send + Sync + 'static>>;

pub type ErrorStream = Pin<Box<dyn Stream<Item = WatchError> + Send + Sync + 'static>>;

/// Describes what a session watches.
#[derive(Clone, Debug, Default)]
pub struct WatchConfig {
    /// The regions to watch. When empty, every region the registry knows about
    /// when the session starts is watched.
    pub regions: Vec<Region>,

    /// The consistency requested on every query for the session's lifetime.
    pub consistency: ConsistencyMode,

    pub params: PollParams,
}

/// A running watch over a fixed set of regions.
///
/// The session's tasks run until the drain signal passed to [`Session::start`]
/// fires. Both streams end exactly once, after every task has stopped.
pub struct Session {
    regions: Vec<Region>,
    snapshots: SnapshotStream,
    errors: ErrorStream,
}

// === impl Session ===

impl Session {
    /// Resolves the set of regions to watch and spawns a poller for each.
    ///
    /// The region set is resolved once; regions added to the registry later are
    /// not watched.
    pub async fn start<C>(
        client: Arc<C>,
        config: WatchConfig,
        metrics: WatchMetrics,
        drain: drain::Watch,
    ) -> Result<Self, SetupError>
    where
        C: DiscoverCatalog,
    {
        let WatchConfig {
            regions,
            consistency,
            params,
        } = config;
        let regions = resolve_regions(&*client, regions).await?;
        info!(?regions, %consistency, "Watching registry services");

        let (snapshots_tx, snapshots_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let mut updates = SelectAll::new();
        for region in &regions {
            let (updates_tx, updates_rx) = mpsc::unbounded_channel();
            let poller = RegionPoller::new(
                region.clone(),
                client.clone(),
                consistency,
                params,
                updates_tx,
                metrics.region(region),
            );
            tokio::spawn(
                poller
                    .run(drain.clone())
                    .instrument(info_span!("poller", %region)),
            );
            updates.push(UnboundedReceiverStream::new(updates_rx));
        }

        let aggregator = Aggregator::new(&regions, snapshots_tx, errors_tx, metrics);
        tokio::spawn(
            aggregator
                .run(updates, drain)
                .instrument(info_span!("aggregator")),
        );

        Ok(Self {
            regions,
            snapshots: Box::pin(UnboundedReceiverStream::new(snapshots_rx)),
            errors: Box::pin(UnboundedReceiverStream::new(errors_rx)),
        })
    }

    /// The regions this session watches, sorted.
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn snapshots(&mut self) -> &mut SnapshotStream {
        &mut self.snapshots
    }

    pub fn errors(&mut self) -> &mut ErrorStream {
        &mut self.errors
    }

    pub fn into_streams(self) -> (SnapshotStream, ErrorStream) {
        (self.snapshots, self.errors)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}

async fn resolve_regions<C>(client: &C, requested: Vec<Region>) -> Result<Vec<Region>, SetupError>
where
    C: DiscoverCatalog,
{
    if !requested.is_empty() {
        let regions = normalize(requested);
        if regions.is_empty() {
            return Err(SetupError::NoRegions);
        }
        return Ok(regions);
    }

    let known = client
        .list_regions()
        .await
        .map_err(SetupError::Unavailable)?;
    let regions = normalize(known);
    if regions.is_empty() {
        return Err(SetupError::NoRegions);
    }
    Ok(regions)
}

/// Drops blank and duplicate region names.
fn normalize(regions: Vec<Region>) -> Vec<Region> {
    let mut set = BTreeSet::new();
    for region in regions {
        let trimmed = region.trim();
        if trimmed.is_empty() {
            warn!("Ignoring blank region name");
            continue;
        }
        set.insert(trimmed.to_string());
    }
    set.into_iter().collect()
}
