//! Watches a service registry for changes to the services it publishes.
//!
//! A [`Session`] spawns one poller per region. Each poller issues blocking
//! catalog queries, resuming from the last index it observed, and reports
//! value-level changes to the region's topology. A single aggregator task
//! merges the pollers' reports into [`Snapshot`]s that always cover every
//! watched region:
//!
//! ```text
//! [ Session ] -> [ Aggregator ] <- [ RegionPoller ]* -> [ DiscoverCatalog ]
//! ```
//!
//! Failures are reported per region on a separate error stream and never
//! disturb sibling regions. Both output streams end once the session's drain
//! signal fires and every task has stopped.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod aggregate;
mod backoff;
mod error;
pub mod metrics;
mod poller;
mod session;


pub use self::{
    backoff::{Backoff, BackoffParams},
    error::{SetupError, Severity, WatchError, WatchErrorKind},
    metrics::WatchMetrics,
    poller::PollParams,
    session::{ErrorStream, Session, SnapshotStream, WatchConfig},
};
pub use gateway_discovery_core::{
    ConsistencyMode, DiscoverCatalog, Region, RegionTopology, ServiceTopology, Snapshot,
};
