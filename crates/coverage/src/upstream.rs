//! Transport seam to the upstream coverage service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use common::Result;
use serde_json::Value;

/// Raw answer from the upstream. `body` is only read when `status` is 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

#[async_trait]
pub trait CoverageUpstream: Send + Sync {
    /// POST `payload` as JSON. Network failures and timeouts are
    /// `Error::UpstreamTransport`; any HTTP status is a successful return.
    async fn post(
        &self,
        url: &str,
        payload: &Value,
        headers: &BTreeMap<String, String>,
    ) -> Result<UpstreamResponse>;
}
