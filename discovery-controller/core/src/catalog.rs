use crate::{Region, ServiceName, Tag};
use std::{collections::BTreeMap, collections::HashMap, fmt, str::FromStr, time::Duration};

/// The raw result of a catalog listing: each service name and the tags
/// registered for it.
pub type ServiceTags = HashMap<ServiceName, Vec<Tag>>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Models read access to a service registry's catalog.
///
/// Implementations are stateless transports: they neither retry nor back off.
/// All resilience policy lives in the watcher.
#[async_trait::async_trait]
pub trait DiscoverCatalog: Send + Sync + 'static {
    /// Lists the regions currently known to the registry.
    async fn list_regions(&self) -> Result<Vec<Region>, CatalogError>;

    /// Lists every service registered in `region`.
    ///
    /// When `options.wait_index` is set the registry holds the request open
    /// until its index moves past the token or `options.wait_time` elapses.
    async fn list_service_names(
        &self,
        region: &str,
        options: &QueryOptions,
    ) -> Result<(ServiceTags, QueryMeta), CatalogError>;

    /// Lists the instances of `service` in `region`, optionally filtered by tag.
    async fn list_service_instances(
        &self,
        service: &str,
        tag: Option<&str>,
        region: &str,
        options: &QueryOptions,
    ) -> Result<(Vec<CatalogService>, QueryMeta), CatalogError>;

    /// Lists the mesh-capable (connect) instances of `service` in `region`.
    async fn list_connect_instances(
        &self,
        service: &str,
        tag: Option<&str>,
        region: &str,
        options: &QueryOptions,
    ) -> Result<(Vec<CatalogService>, QueryMeta), CatalogError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("registry unavailable: {0}")]
    Unavailable(#[source] BoxError),

    #[error("query timed out")]
    Timeout,

    #[error("query failed: {0}")]
    Failed(#[source] BoxError),
}

/// The read consistency requested from the registry.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConsistencyMode {
    /// Reads are served by the leader.
    #[default]
    Default,

    /// Reads may be served by any server and may lag the leader.
    Stale,

    /// The leader confirms its leadership before serving the read.
    Consistent,
}

/// An opaque change cursor returned with every query result.
///
/// Tokens within a region never decrease from the watcher's point of view.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryToken(u64);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub consistency: ConsistencyMode,

    /// Requests a blocking query that returns once the registry's index moves
    /// past this token.
    pub wait_index: Option<QueryToken>,

    /// Bounds how long the registry may hold a blocking query open.
    pub wait_time: Option<Duration>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryMeta {
    pub last_index: QueryToken,

    /// How long ago the serving node last heard from the leader.
    pub last_contact: Duration,

    pub known_leader: bool,
}

/// One registered instance of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CatalogService {
    pub node: String,
    pub address: String,
    pub datacenter: Region,
    pub service_id: String,
    pub service_name: ServiceName,
    pub service_address: String,
    pub service_port: u16,
    pub service_tags: Vec<Tag>,
    pub service_meta: BTreeMap<String, String>,
}

// === impl CatalogError ===

impl CatalogError {
    pub fn unavailable(error: impl Into<BoxError>) -> Self {
        Self::Unavailable(error.into())
    }

    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }
}

// === impl ConsistencyMode ===

impl FromStr for ConsistencyMode {
    type Err = InvalidConsistencyMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" | "Default" => Ok(Self::Default),
            "stale" | "Stale" => Ok(Self::Stale),
            "consistent" | "Consistent" => Ok(Self::Consistent),
            _ => Err(InvalidConsistencyMode(s.to_string())),
        }
    }
}

impl fmt::Display for ConsistencyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => "default".fmt(f),
            Self::Stale => "stale".fmt(f),
            Self::Consistent => "consistent".fmt(f),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid consistency mode '{0}'; expected one of: default, stale, consistent")]
pub struct InvalidConsistencyMode(String);

// === impl QueryToken ===

impl QueryToken {
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for QueryToken {
    fn from(index: u64) -> Self {
        Self(index)
    }
}

impl fmt::Display for QueryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
