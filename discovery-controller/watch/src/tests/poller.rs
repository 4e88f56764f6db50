use super::*;
use crate::{
    metrics::WatchMetrics,
    poller::{PollParams, RegionPoller, Update},
    Severity, WatchError, WatchErrorKind,
};
use gateway_discovery_core::ConsistencyMode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

fn spawn_poller(
    catalog: &Arc<MockCatalog>,
    region: &str,
) -> (drain::Signal, UnboundedReceiverStream<Update>) {
    let (signal, watch) = drain::channel();
    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    let poller = RegionPoller::new(
        region.to_string(),
        catalog.clone(),
        ConsistencyMode::Stale,
        PollParams::default(),
        updates_tx,
        WatchMetrics::default().region(region),
    );
    tokio::spawn(poller.run(watch));
    (signal, UnboundedReceiverStream::new(updates_rx))
}

fn expect_changed(update: Option<Update>) -> ServiceTopology {
    match update {
        Some(Update::Changed(_, topology)) => topology,
        update => panic!("expected a topology change, got {update:?}"),
    }
}

fn expect_failed(update: Option<Update>) -> WatchError {
    match update {
        Some(Update::Failed(error)) => error,
        update => panic!("expected a failure, got {update:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn reports_each_distinct_topology_once() {
    let catalog = Arc::new(MockCatalog::default());
    catalog
        .reply("dc1", 1, &[("web", &["v1"])])
        .reply("dc1", 2, &[("web", &["v1"])])
        .reply("dc1", 3, &[("web", &["v1"])])
        .reply("dc1", 4, &[("web", &["v1"]), ("db", &[])]);
    let (_signal, mut updates) = spawn_poller(&catalog, "dc1");

    assert_eq!(
        expect_changed(next_item(&mut updates).await),
        mk_topology(&[("web", &["v1"])])
    );
    assert_eq!(
        expect_changed(next_item(&mut updates).await),
        mk_topology(&[("web", &["v1"]), ("db", &[])])
    );
    assert_idle(&mut updates).await;
    assert_eq!(catalog.queries("dc1").len(), 5);
}

#[tokio::test(start_paused = true)]
async fn reports_empty_topology() {
    let catalog = Arc::new(MockCatalog::default());
    catalog.reply("dc1", 1, &[]).reply("dc1", 2, &[]);
    let (_signal, mut updates) = spawn_poller(&catalog, "dc1");

    let topology = expect_changed(next_item(&mut updates).await);
    assert!(topology.is_empty());
    assert_idle(&mut updates).await;
}

#[tokio::test(start_paused = true)]
async fn queries_resume_from_the_last_token() {
    let catalog = Arc::new(MockCatalog::default());
    catalog
        .reply("dc1", 5, &[("web", &[])])
        .reply("dc1", 3, &[("web", &[]), ("db", &[])])
        .reply("dc1", 9, &[("db", &[])]);
    let (_signal, mut updates) = spawn_poller(&catalog, "dc1");

    expect_changed(next_item(&mut updates).await);
    // A regressed index still carries new content.
    expect_changed(next_item(&mut updates).await);
    expect_changed(next_item(&mut updates).await);
    assert_idle(&mut updates).await;

    let tokens = catalog
        .queries("dc1")
        .into_iter()
        .map(|q| q.options.wait_index.map(|t| t.get()))
        .collect::<Vec<_>>();
    assert_eq!(tokens, vec![None, Some(5), Some(5), Some(9)]);

    for query in catalog.queries("dc1") {
        assert_eq!(query.options.consistency, ConsistencyMode::Stale);
        assert_eq!(query.options.wait_time, Some(Duration::from_secs(30)));
    }
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_and_keep_the_token() {
    let catalog = Arc::new(MockCatalog::default());
    catalog.reply("dc1", 7, &[("web", &[])]);
    for _ in 0..4 {
        catalog.fail("dc1", CatalogError::unavailable("connection refused"));
    }
    catalog.reply("dc1", 8, &[("web", &[]), ("db", &[])]);
    let (_signal, mut updates) = spawn_poller(&catalog, "dc1");

    expect_changed(next_item(&mut updates).await);
    let severities = [
        Severity::Transient,
        Severity::Transient,
        Severity::LikelyPersistent,
        Severity::LikelyPersistent,
    ];
    for (i, severity) in severities.into_iter().enumerate() {
        let error = expect_failed(next_item(&mut updates).await);
        assert_eq!(error.region, "dc1");
        assert_eq!(error.kind, WatchErrorKind::Unreachable);
        assert_eq!(error.failures, i as u32 + 1);
        assert_eq!(error.severity, severity);
    }
    assert_eq!(
        expect_changed(next_item(&mut updates).await),
        mk_topology(&[("web", &[]), ("db", &[])])
    );

    assert_idle(&mut updates).await;

    let queries = catalog.queries("dc1");
    let gaps = queries
        .windows(2)
        .map(|w| (w[1].at - w[0].at).as_secs())
        .collect::<Vec<_>>();
    assert_eq!(gaps, vec![0, 1, 2, 4, 8, 0]);
    let tokens = queries
        .iter()
        .map(|q| q.options.wait_index.map(|t| t.get()))
        .collect::<Vec<_>>();
    assert_eq!(
        tokens,
        vec![None, Some(7), Some(7), Some(7), Some(7), Some(7), Some(8)]
    );
}

#[tokio::test(start_paused = true)]
async fn success_resets_the_backoff() {
    let catalog = Arc::new(MockCatalog::default());
    catalog
        .fail("dc1", CatalogError::failed("500 Internal Server Error"))
        .fail("dc1", CatalogError::failed("500 Internal Server Error"))
        .reply("dc1", 1, &[("web", &[])])
        .fail("dc1", CatalogError::failed("500 Internal Server Error"))
        .reply("dc1", 2, &[("db", &[])]);
    let (_signal, mut updates) = spawn_poller(&catalog, "dc1");

    assert_eq!(expect_failed(next_item(&mut updates).await).failures, 1);
    let error = expect_failed(next_item(&mut updates).await);
    assert_eq!(error.failures, 2);
    assert_eq!(error.kind, WatchErrorKind::QueryFailed);
    expect_changed(next_item(&mut updates).await);
    assert_eq!(expect_failed(next_item(&mut updates).await).failures, 1);
    expect_changed(next_item(&mut updates).await);
    assert_idle(&mut updates).await;

    let queries = catalog.queries("dc1");
    let gaps = queries
        .windows(2)
        .map(|w| (w[1].at - w[0].at).as_secs())
        .collect::<Vec<_>>();
    assert_eq!(gaps, vec![1, 2, 0, 1, 0]);
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_not_failures() {
    let catalog = Arc::new(MockCatalog::default());
    catalog
        .fail("dc1", CatalogError::Timeout)
        .fail("dc1", CatalogError::Timeout)
        .reply("dc1", 3, &[("web", &[])]);
    let (_signal, mut updates) = spawn_poller(&catalog, "dc1");

    expect_changed(next_item(&mut updates).await);
    assert_idle(&mut updates).await;

    let queries = catalog.queries("dc1");
    assert_eq!(queries.len(), 4);
    assert_eq!(queries[0].at, queries[2].at);
}

#[tokio::test(start_paused = true)]
async fn stops_during_backoff() {
    let catalog = Arc::new(MockCatalog::default());
    catalog.fail("dc1", CatalogError::unavailable("connection refused"));
    let (signal, mut updates) = spawn_poller(&catalog, "dc1");

    expect_failed(next_item(&mut updates).await);
    let started = Instant::now();
    signal.drain().await;
    assert!(next_item(&mut updates).await.is_none());
    assert!(Instant::now() - started < Duration::from_secs(1));
    assert_eq!(catalog.queries("dc1").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stops_during_a_blocking_query() {
    let catalog = Arc::new(MockCatalog::default());
    catalog.reply("dc1", 1, &[("web", &[])]);
    let (signal, mut updates) = spawn_poller(&catalog, "dc1");

    expect_changed(next_item(&mut updates).await);
    // The second query blocks until it is aborted.
    tokio::task::yield_now().await;
    assert_eq!(catalog.queries("dc1").len(), 2);

    signal.drain().await;
    assert!(next_item(&mut updates).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn responses_released_during_drain_are_discarded() {
    let catalog = Arc::new(MockCatalog::default());
    let release = catalog.gated("dc1", Ok((mk_services(&[("web", &[])]), mk_meta(1))));
    let (signal, mut updates) = spawn_poller(&catalog, "dc1");
    queries_issued(&catalog, "dc1", 1).await;

    // The reply completes only after shutdown has been signaled.
    tokio::join!(signal.drain(), async move {
        let _ = release.send(());
    });
    assert!(next_item(&mut updates).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn zero_indexes_still_block() {
    let catalog = Arc::new(MockCatalog::default());
    catalog
        .reply("dc1", 0, &[("web", &[])])
        .reply("dc1", 0, &[("web", &[])])
        .reply("dc1", 4, &[("web", &[]), ("db", &[])]);
    let (_signal, mut updates) = spawn_poller(&catalog, "dc1");

    expect_changed(next_item(&mut updates).await);
    expect_changed(next_item(&mut updates).await);
    assert_idle(&mut updates).await;

    let tokens = catalog
        .queries("dc1")
        .into_iter()
        .map(|q| q.options.wait_index.map(|t| t.get()))
        .collect::<Vec<_>>();
    assert_eq!(tokens, vec![None, Some(1), Some(1), Some(4)]);
}
