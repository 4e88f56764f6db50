use gateway_discovery_core::{ConsistencyMode, QueryOptions};
use std::fmt::Write;
use tokio::time::Duration;

/// Query parameters for a catalog request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Query {
    params: Vec<(&'static str, Option<String>)>,
    wait_time: Option<Duration>,
}

// === impl Query ===

impl Query {
    pub(crate) fn region(mut self, region: &str) -> Self {
        self.params.push(("dc", Some(region.to_string())));
        self
    }

    pub(crate) fn tag(mut self, tag: Option<&str>) -> Self {
        if let Some(tag) = tag {
            self.params.push(("tag", Some(tag.to_string())));
        }
        self
    }

    pub(crate) fn options(mut self, options: &QueryOptions) -> Self {
        match options.consistency {
            ConsistencyMode::Default => {}
            ConsistencyMode::Stale => self.params.push(("stale", None)),
            ConsistencyMode::Consistent => self.params.push(("consistent", None)),
        }

        // `wait` is only honored alongside `index`.
        if let Some(index) = options.wait_index {
            self.params.push(("index", Some(index.get().to_string())));
            if let Some(wait) = options.wait_time {
                self.params
                    .push(("wait", Some(format!("{}ms", wait.as_millis()))));
                self.wait_time = Some(wait);
            }
        }
        self
    }

    /// How long the registry may hold this request open.
    pub(crate) fn wait_time(&self) -> Option<Duration> {
        self.wait_time
    }

    pub(crate) fn encode(&self) -> String {
        let mut query = String::new();
        for (name, value) in &self.params {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(name);
            if let Some(value) = value {
                query.push('=');
                query.push_str(&encode_component(value));
            }
        }
        query
    }
}

/// Percent-encodes everything but RFC 3986 unreserved characters.
pub(crate) fn encode_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_discovery_core::QueryToken;

    #[test]
    fn default_mode_adds_no_consistency_flag() {
        let query = Query::default()
            .region("dc1")
            .options(&QueryOptions::default());
        assert_eq!(query.encode(), "dc=dc1");
        assert_eq!(query.wait_time(), None);
    }

    #[test]
    fn blocking_query() {
        let query = Query::default().region("dc1").options(&QueryOptions {
            consistency: ConsistencyMode::Stale,
            wait_index: Some(QueryToken::new(42)),
            wait_time: Some(Duration::from_secs(30)),
        });
        assert_eq!(query.encode(), "dc=dc1&stale&index=42&wait=30000ms");
        assert_eq!(query.wait_time(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn wait_time_requires_an_index() {
        let query = Query::default().options(&QueryOptions {
            consistency: ConsistencyMode::Consistent,
            wait_index: None,
            wait_time: Some(Duration::from_secs(30)),
        });
        assert_eq!(query.encode(), "consistent");
        assert_eq!(query.wait_time(), None);
    }

    #[test]
    fn encodes_tags() {
        let query = Query::default().region("us east").tag(Some("v1/canary&x"));
        assert_eq!(query.encode(), "dc=us%20east&tag=v1%2Fcanary%26x");
        assert_eq!(Query::default().tag(None).encode(), "");
    }
}
