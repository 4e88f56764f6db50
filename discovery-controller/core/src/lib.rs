//! Data model and registry capability shared by the discovery controller.
//!
//! A registry is partitioned into *regions* (Consul datacenters). Each region
//! publishes a catalog of service names and their tags. The watcher reduces
//! that catalog to a [`ServiceTopology`] per region and merges the regions into
//! a [`Snapshot`].

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod catalog;
pub mod topology;

pub use self::{
    catalog::{
        BoxError, CatalogError, CatalogService, ConsistencyMode, DiscoverCatalog, QueryMeta,
        QueryOptions, QueryToken, ServiceTags,
    },
    topology::{RegionTopology, ServiceMeta, ServiceTopology, Snapshot},
};

/// Identifies an administrative partition of the registry, e.g. a datacenter.
pub type Region = String;

pub type ServiceName = String;

pub type Tag = String;
