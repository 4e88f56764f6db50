use anyhow::{bail, ensure, Result};
use clap::Parser;
use futures::prelude::*;
use gateway_discovery_consul::{ClientConfig, ConsulClient};
use gateway_discovery_core::ConsistencyMode;
use gateway_discovery_watch::{
    BackoffParams, ErrorStream, PollParams, Session, SnapshotStream, WatchConfig, WatchMetrics,
};
use http::Uri;
use kubert::admin::Readiness;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "discovery",
    about = "Watches a service registry's catalog across regions"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "gateway_discovery=info,warn",
        env = "GATEWAY_DISCOVERY_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "http://127.0.0.1:8500", env = "CONSUL_HTTP_ADDR")]
    consul_addr: Uri,

    #[clap(long, env = "CONSUL_HTTP_TOKEN", hide_env_values = true)]
    consul_token: Option<String>,

    /// Comma-separated datacenters to watch.
    ///
    /// When unset, every datacenter known to the registry at startup is
    /// watched.
    #[clap(long, value_delimiter = ',')]
    datacenters: Vec<String>,

    #[clap(long, default_value = "default")]
    consistency_mode: ConsistencyMode,

    /// How long the registry may hold a blocking query open.
    #[clap(long, default_value = "30000")]
    wait_time_ms: u64,

    #[clap(long, default_value = "1000")]
    backoff_initial_ms: u64,

    #[clap(long, default_value = "30000")]
    backoff_max_ms: u64,

    /// Consecutive failures after which a region's errors are reported as
    /// likely persistent.
    #[clap(long, default_value = "3")]
    persistent_failure_threshold: u32,

    /// Added to the wait time before a blocking query is abandoned.
    #[clap(long, default_value = "5000")]
    query_timeout_slack_ms: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let client_config = self.client_config();
        let watch_config = self.watch_config()?;
        let Self {
            log_level,
            log_format,
            admin,
            ..
        } = self;

        log_format.try_init(log_level)?;

        let mut prom = <Registry>::default();
        let metrics = WatchMetrics::register(prom.sub_registry_with_prefix("discovery"));

        let client = ConsulClient::new(client_config)?;
        let (shutdown, watch) = kubert::shutdown::sigint_or_sigterm()?;

        let session = Session::start(Arc::new(client), watch_config, metrics, watch).await?;
        let (snapshots, errors) = session.into_streams();

        // The admin server reports ready once the first snapshot is observed.
        let admin = admin.into_builder().with_prometheus(prom).bind()?;
        let ready = admin.readiness();
        let _admin = admin.spawn();

        let snapshots =
            tokio::spawn(log_snapshots(snapshots, ready).instrument(info_span!("snapshots")));
        let errors = tokio::spawn(log_errors(errors).instrument(info_span!("errors")));

        // Block the main thread on the shutdown signal. Once it fires, wait for the
        // background tasks to complete before exiting.
        if shutdown.signaled().await.is_err() {
            bail!("Aborted");
        }
        info!("Watch stopped");

        snapshots.await?;
        errors.await?;
        Ok(())
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            address: self.consul_addr.clone(),
            token: self.consul_token.clone(),
            timeout_slack: Duration::from_millis(self.query_timeout_slack_ms),
        }
    }

    fn watch_config(&self) -> Result<WatchConfig> {
        let backoff = BackoffParams {
            initial: Duration::from_millis(self.backoff_initial_ms),
            max: Duration::from_millis(self.backoff_max_ms),
        };
        ensure!(
            !backoff.initial.is_zero(),
            "--backoff-initial-ms must be positive"
        );
        ensure!(
            backoff.initial <= backoff.max,
            "--backoff-initial-ms must not exceed --backoff-max-ms"
        );
        ensure!(
            self.persistent_failure_threshold > 0,
            "--persistent-failure-threshold must be positive"
        );

        Ok(WatchConfig {
            regions: self.datacenters.clone(),
            consistency: self.consistency_mode,
            params: PollParams {
                wait_time: Duration::from_millis(self.wait_time_ms),
                backoff,
                persistent_after: self.persistent_failure_threshold,
            },
        })
    }
}

async fn log_snapshots(mut snapshots: SnapshotStream, ready: Readiness) {
    while let Some(snapshot) = snapshots.next().await {
        if !ready.get() {
            info!("Ready");
            ready.set(true);
        }
        let synced = snapshot.iter().filter(|(_, t)| t.is_synced()).count();
        let services = snapshot.services();
        info!(
            regions = snapshot.len(),
            synced,
            services = services.len(),
            "Service topology changed"
        );
        for service in &services {
            debug!(
                service = %service.name,
                regions = ?service.regions,
                tags = ?service.tags,
            );
        }
    }
    debug!("Snapshot stream ended");
}

async fn log_errors(mut errors: ErrorStream) {
    while let Some(error) = errors.next().await {
        warn!(
            region = %error.region,
            kind = %error.kind,
            severity = %error.severity,
            failures = error.failures,
            error = %error.catalog_error(),
            "Registry query failed"
        );
    }
    debug!("Error stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_discovery_core::Snapshot;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["discovery"]).unwrap();
        assert!(matches!(args.log_format, kubert::LogFormat::Plain));
        assert_eq!(args.admin.admin_addr.port(), 8080);
        assert_eq!(args.consul_addr.host(), Some("127.0.0.1"));
        assert_eq!(args.consul_addr.port_u16(), Some(8500));
        assert!(args.datacenters.is_empty());

        let config = args.watch_config().unwrap();
        assert_eq!(config.consistency, ConsistencyMode::Default);
        assert_eq!(config.params, PollParams::default());
    }

    #[test]
    fn parses_watch_flags() {
        let args = Args::try_parse_from([
            "discovery",
            "--datacenters=dc1,dc2",
            "--consistency-mode=stale",
            "--wait-time-ms=5000",
            "--backoff-initial-ms=250",
            "--backoff-max-ms=4000",
            "--persistent-failure-threshold=5",
        ])
        .unwrap();
        let config = args.watch_config().unwrap();
        assert_eq!(config.regions, vec!["dc1".to_string(), "dc2".to_string()]);
        assert_eq!(config.consistency, ConsistencyMode::Stale);
        assert_eq!(config.params.wait_time, Duration::from_secs(5));
        assert_eq!(
            config.params.backoff,
            BackoffParams {
                initial: Duration::from_millis(250),
                max: Duration::from_secs(4),
            }
        );
        assert_eq!(config.params.persistent_after, 5);
    }

    #[test]
    fn rejects_inverted_backoff() {
        let args = Args::try_parse_from([
            "discovery",
            "--backoff-initial-ms=5000",
            "--backoff-max-ms=1000",
        ])
        .unwrap();
        assert!(args.watch_config().is_err());
    }

    #[test]
    fn rejects_invalid_log_settings() {
        assert!(Args::try_parse_from(["discovery", "--log-format=yaml"]).is_err());
        assert!(
            Args::try_parse_from(["discovery", "--log-level=gateway_discovery=loud"]).is_err()
        );
    }

    #[tokio::test]
    async fn ready_after_first_snapshot() {
        let ready = kubert::AdminArgs::default().into_builder().readiness();
        assert!(!ready.get());

        let snapshots: SnapshotStream = Box::pin(stream::iter(vec![Snapshot::pending(vec![
            "dc1".to_string(),
        ])]));
        log_snapshots(snapshots, ready.clone()).await;
        assert!(ready.get());
    }

    #[tokio::test]
    async fn not_ready_without_snapshots() {
        let ready = kubert::AdminArgs::default().into_builder().readiness();
        log_snapshots(Box::pin(stream::empty::<Snapshot>()), ready.clone()).await;
        assert!(!ready.get());
    }

    #[test]
    fn rejects_unknown_consistency_modes() {
        assert!(Args::try_parse_from(["discovery", "--consistency-mode=eventual"]).is_err());
    }
}
