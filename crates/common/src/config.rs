//! Application configuration types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Coverage cache and background refresh parameters.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Upstream coverage service endpoint and wire schema.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Calendar settings for window bucketing.
    #[serde(default)]
    pub window: WindowConfig,

    /// Timing for the `watch` command (seconds).
    #[serde(default)]
    pub watch: WatchConfig,

    /// Monitoring groups and their sites.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// Cache lifetime and refresh scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Lifetime of a cached group result. Also the window granularity
    /// used to normalize request time ranges.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,

    /// Fraction of the TTL that must elapse before a hit schedules a
    /// background refresh (0.8 = 80% of the lifetime used up).
    #[serde(default = "default_refresh_threshold")]
    pub refresh_threshold_percentage: f64,

    /// Upper bound on refreshes running against the upstream at once.
    #[serde(default = "default_max_concurrent_refreshes")]
    pub max_concurrent_refreshes: usize,
}

/// Upstream coverage service. Every field name of the request and
/// response bodies is configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL, e.g. `http://analytics.internal:3001`.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Path appended to `url`, or an absolute URL used as-is.
    #[serde(default = "default_upstream_endpoint")]
    pub endpoint: String,

    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default = "default_geometry_outer_key")]
    pub geometry_outer_key: String,

    #[serde(default = "default_geometry_inner_key")]
    pub geometry_inner_key: String,

    #[serde(default = "default_site_name_key")]
    pub site_name_key: String,

    #[serde(default = "default_time_range_outer_key")]
    pub time_range_outer_key: String,

    #[serde(default = "default_time_range_inner_key")]
    pub time_range_inner_key: String,

    /// Key of the result array in the response body.
    #[serde(default = "default_response_key")]
    pub response_key: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Calendar used for window boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// IANA time zone name (e.g. "Europe/Berlin").
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Interval between coverage queries.
    #[serde(default = "default_watch_interval")]
    pub interval_secs: u64,

    /// Interval between heartbeat log lines.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_secs: u64,
}

/// A monitoring group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    /// Refresh interval for sites that do not set their own.
    #[serde(default = "default_group_refresh")]
    pub default_refresh_seconds: u64,

    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

/// A monitored site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,

    /// Footprint polygon as WKT.
    #[serde(default)]
    pub geometry: Option<String>,

    #[serde(default)]
    pub refresh_seconds: Option<u64>,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_ttl() -> u64 {
    3600
}
fn default_refresh_threshold() -> f64 {
    0.8
}
fn default_max_concurrent_refreshes() -> usize {
    4
}

fn default_upstream_url() -> String {
    "http://localhost:3001".into()
}
fn default_upstream_endpoint() -> String {
    "/service1/current-status".into()
}
fn default_geometry_outer_key() -> String {
    "geometries".into()
}
fn default_geometry_inner_key() -> String {
    "wkt".into()
}
fn default_site_name_key() -> String {
    "siteNames".into()
}
fn default_time_range_outer_key() -> String {
    "timeRange".into()
}
fn default_time_range_inner_key() -> String {
    "dates".into()
}
fn default_response_key() -> String {
    "sites".into()
}
fn default_timeout() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_watch_interval() -> u64 {
    60
}
fn default_heartbeat_interval() -> u64 {
    30
}

fn default_group_refresh() -> u64 {
    86_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            refresh_threshold_percentage: default_refresh_threshold(),
            max_concurrent_refreshes: default_max_concurrent_refreshes(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            endpoint: default_upstream_endpoint(),
            headers: BTreeMap::new(),
            geometry_outer_key: default_geometry_outer_key(),
            geometry_inner_key: default_geometry_inner_key(),
            site_name_key: default_site_name_key(),
            time_range_outer_key: default_time_range_outer_key(),
            time_range_inner_key: default_time_range_inner_key(),
            response_key: default_response_key(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_watch_interval(),
            heartbeat_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            upstream: UpstreamConfig::default(),
            window: WindowConfig::default(),
            watch: WatchConfig::default(),
            groups: Vec::new(),
        }
    }
}

impl UpstreamConfig {
    /// Full request URL: an absolute `endpoint` wins, otherwise it is
    /// joined onto `url` with exactly one slash.
    pub fn resolve_url(&self) -> String {
        let endpoint = self.endpoint.trim();
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        let base = self.url.trim().trim_end_matches('/');
        let path = endpoint.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }
}
