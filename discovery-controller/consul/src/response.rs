use gateway_discovery_core::{CatalogService, QueryMeta, QueryToken, ServiceTags};
use http::HeaderMap;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tokio::time::Duration;

const INDEX_HEADER: &str = "x-consul-index";
const LAST_CONTACT_HEADER: &str = "x-consul-lastcontact";
const KNOWN_LEADER_HEADER: &str = "x-consul-knownleader";

#[derive(Debug, thiserror::Error)]
pub enum InvalidHeader {
    #[error("missing {0} header")]
    Missing(&'static str),

    #[error("invalid {name} header: {value:?}")]
    Malformed { name: &'static str, value: String },
}

/// An instance record as returned by `/v1/catalog/service/:name`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub(crate) struct CatalogServiceJson {
    node: String,
    address: String,
    datacenter: String,
    #[serde(rename = "ServiceID")]
    service_id: String,
    service_name: String,
    service_address: String,
    service_port: u16,
    service_tags: Option<Vec<String>>,
    service_meta: Option<BTreeMap<String, String>>,
}

/// The body of `/v1/catalog/services`. Tag lists may be null.
pub(crate) type ServicesJson = HashMap<String, Option<Vec<String>>>;

pub(crate) fn query_meta(headers: &HeaderMap) -> Result<QueryMeta, InvalidHeader> {
    let last_index = match header_str(headers, INDEX_HEADER)? {
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| InvalidHeader::malformed(INDEX_HEADER, value))?,
        None => return Err(InvalidHeader::Missing(INDEX_HEADER)),
    };

    let last_contact = match header_str(headers, LAST_CONTACT_HEADER)? {
        Some(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| InvalidHeader::malformed(LAST_CONTACT_HEADER, value))?,
        None => Duration::ZERO,
    };

    let known_leader = match header_str(headers, KNOWN_LEADER_HEADER)? {
        Some("true") => true,
        Some("false") | None => false,
        Some(value) => return Err(InvalidHeader::malformed(KNOWN_LEADER_HEADER, value)),
    };

    Ok(QueryMeta {
        last_index: QueryToken::new(last_index),
        last_contact,
        known_leader,
    })
}

fn header_str<'h>(
    headers: &'h HeaderMap,
    name: &'static str,
) -> Result<Option<&'h str>, InvalidHeader> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| {
                InvalidHeader::malformed(name, String::from_utf8_lossy(value.as_bytes()))
            }),
        None => Ok(None),
    }
}

pub(crate) fn service_tags(services: ServicesJson) -> ServiceTags {
    services
        .into_iter()
        .map(|(name, tags)| (name, tags.unwrap_or_default()))
        .collect()
}

// === impl InvalidHeader ===

impl InvalidHeader {
    fn malformed(name: &'static str, value: impl ToString) -> Self {
        Self::Malformed {
            name,
            value: value.to_string(),
        }
    }
}

// === impl CatalogServiceJson ===

impl From<CatalogServiceJson> for CatalogService {
    fn from(json: CatalogServiceJson) -> Self {
        let CatalogServiceJson {
            node,
            address,
            datacenter,
            service_id,
            service_name,
            service_address,
            service_port,
            service_tags,
            service_meta,
        } = json;
        Self {
            node,
            address,
            datacenter,
            service_id,
            service_name,
            service_address,
            service_port,
            service_tags: service_tags.unwrap_or_default(),
            service_meta: service_meta.unwrap_or_default(),
        }
    }
}
