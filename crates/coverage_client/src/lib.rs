//! HTTP client for the upstream coverage service.
//!
//! Posts coverage payloads as JSON and hands the raw status and body back
//! to the orchestrator, which decides what a non-200 means.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use common::config::UpstreamConfig;
use common::{Error, Result};
use coverage::{CoverageUpstream, UpstreamResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tracing::debug;

const USER_AGENT: &str = concat!("coverwatch/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct HttpCoverageClient {
    client: reqwest::Client,
}

impl HttpCoverageClient {
    /// Build a client with the configured request timeout. Configured
    /// headers are checked here so bad names fail at startup.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self> {
        header_map(&upstream.headers)?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(upstream.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build coverage HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

/// Convert configured headers into a `HeaderMap`.
pub fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid upstream header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid value for upstream header '{name}': {e}")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[async_trait]
impl CoverageUpstream for HttpCoverageClient {
    async fn post(
        &self,
        url: &str,
        payload: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<UpstreamResponse> {
        debug!("POST {} ({} headers)", url, headers.len());

        let resp = self
            .client
            .post(url)
            .headers(header_map(headers)?)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::UpstreamTransport(format!("HTTP error for {url}: {e}")))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::UpstreamTransport(format!("failed to read body from {url}: {e}")))?;

        if status != 200 {
            let preview: String = body.chars().take(500).collect();
            debug!("Coverage service returned {} for {}: {}", status, url, preview);
        }

        Ok(UpstreamResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_accepts_configured_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        headers.insert("x-tenant".to_string(), "north".to_string());

        let map = header_map(&headers).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["authorization"], "Bearer abc");
        assert_eq!(map["x-tenant"], "north");
    }

    #[test]
    fn test_header_map_rejects_bad_names() {
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        assert!(matches!(header_map(&headers), Err(Error::Config(_))));

        let mut upstream = UpstreamConfig::default();
        upstream.headers.insert("x-ok".into(), "line\nbreak".into());
        assert!(matches!(
            HttpCoverageClient::new(&upstream),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let upstream = UpstreamConfig {
            timeout_secs: 2,
            ..UpstreamConfig::default()
        };
        let client = HttpCoverageClient::new(&upstream).unwrap();

        // Port 9 (discard) on loopback is closed on any sane test box.
        let err = client
            .post("http://127.0.0.1:9/status", &serde_json::json!({}), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamTransport(_)));
        assert!(err.is_degradable());
    }
}
