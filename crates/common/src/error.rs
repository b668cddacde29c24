//! Unified error type for coverwatch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration. Fatal at startup.
    #[error("Config error: {0}")]
    Config(String),

    /// Network failure, timeout, non-200 status or unreadable body.
    #[error("Upstream transport error: {0}")]
    UpstreamTransport(String),

    /// The upstream answered, but not in the agreed shape.
    #[error("Upstream contract error: {0}")]
    UpstreamContract(String),

    #[error("Site store error: {0}")]
    SiteStore(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a foreground caller may recover from this error by serving
    /// stale or NoData results.
    pub fn is_degradable(&self) -> bool {
        matches!(self, Error::UpstreamTransport(_) | Error::SiteStore(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_errors_are_not_degradable() {
        assert!(Error::UpstreamTransport("timeout".into()).is_degradable());
        assert!(Error::SiteStore("db down".into()).is_degradable());
        assert!(!Error::UpstreamContract("no array".into()).is_degradable());
        assert!(!Error::Config("ttl".into()).is_degradable());
    }
}
