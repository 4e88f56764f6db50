use crate::{
    backoff::{Backoff, BackoffParams},
    error::WatchError,
    metrics::RegionMetrics,
};
use gateway_discovery_core::{
    CatalogError, ConsistencyMode, DiscoverCatalog, QueryMeta, QueryOptions, QueryToken, Region,
    ServiceTags, ServiceTopology,
};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{self, Duration},
};
use tracing::{debug, info, trace};

/// Tunes how each region's poller queries the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PollParams {
    /// How long the registry may hold a blocking query open.
    pub wait_time: Duration,

    pub backoff: BackoffParams,

    /// The number of consecutive failures after which a region's errors are
    /// reported as likely persistent.
    pub persistent_after: u32,
}

/// Reports from a region's poller to the aggregator.
#[derive(Debug)]
pub(crate) enum Update {
    Changed(Region, ServiceTopology),
    Failed(WatchError),
}

/// Drives blocking catalog queries for a single region.
///
/// All of the poller's state is owned by its task: the last observed token and
/// the last topology it reported.
pub(crate) struct RegionPoller<C> {
    region: Region,
    client: Arc<C>,
    consistency: ConsistencyMode,
    params: PollParams,
    token: Option<QueryToken>,
    last: Option<ServiceTopology>,
    failures: u32,
    backoff: Backoff,
    updates: mpsc::UnboundedSender<Update>,
    metrics: RegionMetrics,
}

/// The aggregator has gone away.
#[derive(Debug)]
struct Closed;

// === impl PollParams ===

impl Default for PollParams {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(30),
            backoff: BackoffParams::default(),
            persistent_after: 3,
        }
    }
}

// === impl RegionPoller ===

impl<C> RegionPoller<C>
where
    C: DiscoverCatalog,
{
    pub(crate) fn new(
        region: Region,
        client: Arc<C>,
        consistency: ConsistencyMode,
        params: PollParams,
        updates: mpsc::UnboundedSender<Update>,
        metrics: RegionMetrics,
    ) -> Self {
        Self {
            region,
            client,
            consistency,
            backoff: Backoff::new(params.backoff),
            params,
            token: None,
            last: None,
            failures: 0,
            updates,
            metrics,
        }
    }

    /// Polls until `drain` is signaled or the aggregator stops listening.
    ///
    /// An in-flight query is dropped as soon as shutdown is signaled, so a
    /// response that completes afterwards is never reported.
    pub(crate) async fn run(mut self, drain: drain::Watch) {
        tokio::pin! {
            let shutdown = drain.signaled();
        }

        let release = loop {
            let options = self.query_options();
            trace!(region = %self.region, token = ?options.wait_index, "Querying catalog");
            let result = tokio::select! {
                biased;
                release = &mut shutdown => break Some(release),
                result = self.client.list_service_names(&self.region, &options) => result,
            };

            match self.handle(result) {
                Ok(None) => {}
                Ok(Some(delay)) => tokio::select! {
                    biased;
                    release = &mut shutdown => break Some(release),
                    () = time::sleep(delay) => {}
                },
                Err(Closed) => break None,
            }
        };

        debug!(region = %self.region, "Poller stopped");
        // The update sender must be dropped before the drain handle is released.
        drop(self);
        drop(release);
    }

    fn query_options(&self) -> QueryOptions {
        QueryOptions {
            consistency: self.consistency,
            wait_index: self.token,
            wait_time: Some(self.params.wait_time),
        }
    }

    /// Returns the delay to wait before the next query, if any.
    fn handle(
        &mut self,
        result: Result<(ServiceTags, QueryMeta), CatalogError>,
    ) -> Result<Option<Duration>, Closed> {
        match result {
            Ok((services, meta)) => {
                self.on_response(services, meta)?;
                Ok(None)
            }
            Err(CatalogError::Timeout) => {
                // The long poll expired without an answer; nothing changed.
                debug!(region = %self.region, "Catalog query timed out");
                self.metrics.query_timed_out();
                Ok(None)
            }
            Err(error) => self.on_failure(error).map(Some),
        }
    }

    fn on_response(&mut self, services: ServiceTags, meta: QueryMeta) -> Result<(), Closed> {
        self.metrics.query_succeeded(meta.last_contact);
        self.failures = 0;
        self.backoff.reset();

        // An index of 0 would turn the next blocking query into an immediate one.
        let index = meta.last_index.max(QueryToken::new(1));
        let index_unchanged = self.token == Some(index);
        match self.token {
            Some(token) if index < token => {
                debug!(
                    region = %self.region,
                    %token,
                    %index,
                    "Registry index moved backwards; keeping last token"
                );
            }
            _ => self.token = Some(index),
        }

        if index_unchanged && self.last.is_some() {
            trace!(region = %self.region, %index, "Catalog index unchanged");
            return Ok(());
        }

        let topology = services.into_iter().collect::<ServiceTopology>();
        if self.last.as_ref() == Some(&topology) {
            debug!(region = %self.region, %index, "Catalog contents unchanged");
            return Ok(());
        }

        info!(
            region = %self.region,
            services = topology.len(),
            %index,
            known_leader = meta.known_leader,
            "Service topology changed"
        );
        self.metrics.topology_changed();
        self.updates
            .send(Update::Changed(self.region.clone(), topology.clone()))
            .map_err(|_| Closed)?;
        self.last = Some(topology);
        Ok(())
    }

    fn on_failure(&mut self, error: CatalogError) -> Result<Duration, Closed> {
        self.failures = self.failures.saturating_add(1);
        let delay = self.backoff.next_delay();
        let error = WatchError::new(
            self.region.clone(),
            error,
            self.failures,
            self.params.persistent_after,
        );
        self.metrics.query_failed(error.kind);
        debug!(
            region = %self.region,
            failures = self.failures,
            severity = %error.severity,
            backoff = ?delay,
            error = %error.catalog_error(),
            "Catalog query failed"
        );
        self.updates
            .send(Update::Failed(error))
            .map_err(|_| Closed)?;
        Ok(delay)
    }
}
