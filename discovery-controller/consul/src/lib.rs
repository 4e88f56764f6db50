//! A [`DiscoverCatalog`] backed by the Consul catalog HTTP API.
//!
//! Requests are issued over plain HTTP/1.1. Blocking queries are bounded by a
//! client-side deadline slightly longer than the requested wait so that a
//! registry which never answers surfaces as [`CatalogError::Timeout`].

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod query;
mod response;

pub use self::response::InvalidHeader;

use self::{
    query::{encode_component, Query},
    response::{query_meta, service_tags, CatalogServiceJson, ServicesJson},
};
use async_trait::async_trait;
use bytes::Bytes;
use gateway_discovery_core::{
    CatalogError, CatalogService, DiscoverCatalog, QueryMeta, QueryOptions, Region, ServiceTags,
};
use http::{header::HeaderValue, uri, HeaderMap, Request, Uri};
use http_body_util::{BodyExt, Empty};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::de::DeserializeOwned;
use tokio::time::{self, Duration};
use tracing::{debug, trace};

const TOKEN_HEADER: &str = "x-consul-token";

/// The deadline for requests that do not block.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// The agent's base address, e.g. `http://127.0.0.1:8500`.
    pub address: Uri,

    /// An ACL token sent with every request.
    pub token: Option<String>,

    /// Added to the wait time of blocking queries before the client gives up.
    pub timeout_slack: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("registry address {0} must include a scheme and host")]
    IncompleteAddress(Uri),

    #[error("unsupported registry scheme {0}; only http is supported")]
    UnsupportedScheme(String),

    #[error("invalid ACL token")]
    InvalidToken(#[source] http::header::InvalidHeaderValue),
}

#[derive(Clone, Debug)]
pub struct ConsulClient {
    authority: uri::Authority,
    token: Option<HeaderValue>,
    timeout_slack: Duration,
    http: Client<HttpConnector, Empty<Bytes>>,
}

// === impl ClientConfig ===

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: Uri::from_static("http://127.0.0.1:8500"),
            token: None,
            timeout_slack: Duration::from_secs(5),
        }
    }
}

// === impl ConsulClient ===

impl ConsulClient {
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        let ClientConfig {
            address,
            token,
            timeout_slack,
        } = config;

        let scheme = address
            .scheme_str()
            .ok_or_else(|| ConfigError::IncompleteAddress(address.clone()))?;
        if scheme != "http" {
            return Err(ConfigError::UnsupportedScheme(scheme.to_string()));
        }
        let authority = address
            .authority()
            .cloned()
            .ok_or_else(|| ConfigError::IncompleteAddress(address.clone()))?;

        let token = match token.filter(|t| !t.is_empty()) {
            Some(token) => {
                let mut value = HeaderValue::try_from(token).map_err(ConfigError::InvalidToken)?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        let http = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self {
            authority,
            token,
            timeout_slack,
            http,
        })
    }

    fn uri(&self, path: &str, query: &Query) -> Result<Uri, CatalogError> {
        let query = query.encode();
        let path_and_query = if query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{query}")
        };
        Uri::builder()
            .scheme(uri::Scheme::HTTP)
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(CatalogError::failed)
    }

    /// Consul adds up to `wait / 16` of jitter to blocking queries.
    fn deadline(&self, query: &Query) -> Duration {
        match query.wait_time() {
            Some(wait) => wait + wait / 16 + self.timeout_slack,
            None => DEFAULT_TIMEOUT,
        }
    }

    /// Issues a catalog query whose response carries blocking-query metadata.
    async fn get_with_meta<T>(
        &self,
        path: &str,
        query: Query,
    ) -> Result<(T, QueryMeta), CatalogError>
    where
        T: DeserializeOwned,
    {
        let (value, headers) = self.get(path, query).await?;
        let meta = query_meta(&headers).map_err(CatalogError::failed)?;
        Ok((value, meta))
    }

    async fn get<T>(&self, path: &str, query: Query) -> Result<(T, HeaderMap), CatalogError>
    where
        T: DeserializeOwned,
    {
        let uri = self.uri(path, &query)?;
        let mut req = Request::get(uri.clone())
            .body(Empty::new())
            .map_err(CatalogError::failed)?;
        if let Some(token) = &self.token {
            req.headers_mut().insert(TOKEN_HEADER, token.clone());
        }

        let deadline = self.deadline(&query);
        trace!(%uri, ?deadline, "Querying registry");
        let (parts, body) = match time::timeout(deadline, self.send(req)).await {
            Ok(rsp) => rsp?,
            Err(_) => {
                debug!(%uri, "Registry query timed out");
                return Err(CatalogError::Timeout);
            }
        };

        if !parts.status.is_success() {
            let message = String::from_utf8_lossy(&body);
            return Err(CatalogError::failed(format!(
                "{} {}",
                parts.status,
                message.trim()
            )));
        }

        let value = serde_json::from_slice(&body).map_err(CatalogError::failed)?;
        Ok((value, parts.headers))
    }

    async fn send(
        &self,
        req: Request<Empty<Bytes>>,
    ) -> Result<(http::response::Parts, Bytes), CatalogError> {
        let rsp = self.http.request(req).await.map_err(|error| {
            if error.is_connect() {
                CatalogError::unavailable(error)
            } else {
                CatalogError::failed(error)
            }
        })?;
        let (parts, body) = rsp.into_parts();
        let body = body
            .collect()
            .await
            .map_err(CatalogError::unavailable)?
            .to_bytes();
        Ok((parts, body))
    }
}

#[async_trait]
impl DiscoverCatalog for ConsulClient {
    async fn list_regions(&self) -> Result<Vec<Region>, CatalogError> {
        let (regions, _) = self
            .get::<Vec<Region>>("/v1/catalog/datacenters", Query::default())
            .await?;
        Ok(regions)
    }

    async fn list_service_names(
        &self,
        region: &str,
        options: &QueryOptions,
    ) -> Result<(ServiceTags, QueryMeta), CatalogError> {
        let query = Query::default().region(region).options(options);
        let (services, meta) = self
            .get_with_meta::<ServicesJson>("/v1/catalog/services", query)
            .await?;
        Ok((service_tags(services), meta))
    }

    async fn list_service_instances(
        &self,
        service: &str,
        tag: Option<&str>,
        region: &str,
        options: &QueryOptions,
    ) -> Result<(Vec<CatalogService>, QueryMeta), CatalogError> {
        let path = format!("/v1/catalog/service/{}", encode_component(service));
        self.instances(&path, tag, region, options).await
    }

    async fn list_connect_instances(
        &self,
        service: &str,
        tag: Option<&str>,
        region: &str,
        options: &QueryOptions,
    ) -> Result<(Vec<CatalogService>, QueryMeta), CatalogError> {
        let path = format!("/v1/catalog/connect/{}", encode_component(service));
        self.instances(&path, tag, region, options).await
    }
}

impl ConsulClient {
    async fn instances(
        &self,
        path: &str,
        tag: Option<&str>,
        region: &str,
        options: &QueryOptions,
    ) -> Result<(Vec<CatalogService>, QueryMeta), CatalogError> {
        let query = Query::default().region(region).tag(tag).options(options);
        let (instances, meta) = self
            .get_with_meta::<Vec<CatalogServiceJson>>(path, query)
            .await?;
        Ok((instances.into_iter().map(Into::into).collect(), meta))
    }
}
