//! Coverage orchestration: cache lookup, upstream fetch, background refresh.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::config::{CacheConfig, UpstreamConfig};
use common::{CoverageResult, Error, Result, SiteGeometry, SiteRecord, TimeRange};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::{Lookup, TtlCache};
use crate::filter::{filter_for_requested, no_data_for};
use crate::mapper::map_response;
use crate::payload::{build_payload, iso_millis};
use crate::refresh::{RefreshQueue, RefreshStats};
use crate::store::SiteStore;
use crate::upstream::CoverageUpstream;
use crate::window::{Granularity, WindowCalculator};

/// Cache key for one group over one normalized time range (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(group: &str, normalized: &TimeRange) -> Self {
        let material = format!(
            "coverage:{}:{}:{}",
            group,
            iso_millis(&normalized.from),
            iso_millis(&normalized.to)
        );
        Self(format!("{:x}", Sha256::digest(material.as_bytes())))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell keys apart in logs.
        f.write_str(self.0.get(..12).unwrap_or(&self.0))
    }
}

type GroupResults = Arc<Vec<CoverageResult>>;

struct ServiceState {
    sites: Arc<dyn SiteStore>,
    upstream: Arc<dyn CoverageUpstream>,
    cache: TtlCache<CacheKey, GroupResults>,
    refresh: RefreshQueue<CacheKey>,
    windows: WindowCalculator,
    cache_config: CacheConfig,
    upstream_config: UpstreamConfig,
    url: String,
}

/// Entry point for coverage queries. Cheap to clone; clones share the
/// cache and the refresh queue.
#[derive(Clone)]
pub struct CoverageService {
    state: Arc<ServiceState>,
}

impl CoverageService {
    pub fn new(
        cache_config: CacheConfig,
        upstream_config: UpstreamConfig,
        windows: WindowCalculator,
        sites: Arc<dyn SiteStore>,
        upstream: Arc<dyn CoverageUpstream>,
    ) -> Result<Self> {
        Granularity::classify(cache_config.ttl_seconds)?;

        let threshold = cache_config.refresh_threshold_percentage;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "cache.refresh_threshold_percentage={threshold} must be within [0, 1]"
            )));
        }
        if cache_config.max_concurrent_refreshes == 0 {
            return Err(Error::Config(
                "cache.max_concurrent_refreshes must be > 0".into(),
            ));
        }

        let url = upstream_config.resolve_url();
        Ok(Self {
            state: Arc::new(ServiceState {
                sites,
                upstream,
                cache: TtlCache::new(),
                refresh: RefreshQueue::new(cache_config.max_concurrent_refreshes),
                windows,
                cache_config,
                upstream_config,
                url,
            }),
        })
    }

    /// Coverage for `requested_sites` of `group` over `range`, one result
    /// per requested name in request order.
    ///
    /// Upstream transport failures and site-store failures degrade to the
    /// last cached value for the same window, else to NoData. A response
    /// that breaks the wire contract is returned as an error.
    pub async fn get_coverage(
        &self,
        group: &str,
        requested_sites: &[String],
        range: TimeRange,
    ) -> Result<Vec<CoverageResult>> {
        if requested_sites.is_empty() {
            return Ok(Vec::new());
        }

        let normalized = self
            .state
            .windows
            .normalize_range(&range, self.state.cache_config.ttl_seconds)?;
        let key = CacheKey::new(group, &normalized);

        let stale = match self.state.cache.lookup(&key) {
            Lookup::Fresh(hit) => {
                debug!("Cache hit for group {} ({})", group, key);
                if self
                    .state
                    .cache
                    .is_expiring_soon(&key, self.state.cache_config.refresh_threshold_percentage)
                {
                    self.schedule_refresh(group, normalized, key);
                }
                return Ok(filter_for_requested(&hit, requested_sites));
            }
            Lookup::Stale(old) => Some(old),
            Lookup::Missing => None,
        };

        match self.fetch_group(group, &normalized).await {
            Ok(Some(results)) => {
                let results = Arc::new(results);
                self.store(key, Arc::clone(&results));
                Ok(filter_for_requested(&results, requested_sites))
            }
            Ok(None) => Ok(no_data_for(requested_sites)),
            Err(e) if e.is_degradable() => match stale {
                Some(old) => {
                    warn!("Serving stale coverage for group {}: {}", group, e);
                    Ok(filter_for_requested(&old, requested_sites))
                }
                None => {
                    warn!("No coverage for group {}: {}", group, e);
                    Ok(no_data_for(requested_sites))
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Refill the cache for `group` over `range` in the background.
    /// Returns `false` when a refresh for the same window is already running.
    pub fn refresh_group(&self, group: &str, range: TimeRange) -> Result<bool> {
        let normalized = self
            .state
            .windows
            .normalize_range(&range, self.state.cache_config.ttl_seconds)?;
        let key = CacheKey::new(group, &normalized);
        Ok(self.schedule_refresh(group, normalized, key))
    }

    /// The trailing range covering the shortest refresh interval among the
    /// group's mapped sites, ending at `now`. Falls back to the cache TTL
    /// when no site has geometry.
    pub async fn live_range(&self, group: &str, now: DateTime<Utc>) -> Result<TimeRange> {
        let sites = self.state.sites.find_sites_for_group(group).await?;
        let secs = sites
            .iter()
            .filter_map(SiteRecord::geometry)
            .map(|site| site.refresh_seconds)
            .min()
            .unwrap_or(self.state.cache_config.ttl_seconds);
        Ok(TimeRange::trailing(now, secs))
    }

    pub fn windows(&self) -> &WindowCalculator {
        &self.state.windows
    }

    pub fn refresh_queue(&self) -> &RefreshQueue<CacheKey> {
        &self.state.refresh
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.state.refresh.stats()
    }

    pub fn cached_entries(&self) -> usize {
        self.state.cache.len()
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.state.cache_config.ttl_seconds)
    }

    fn store(&self, key: CacheKey, results: GroupResults) {
        self.state.cache.set(key, results, self.ttl());
        let evicted = self.state.cache.evict_stale(self.ttl());
        if evicted > 0 {
            debug!("Evicted {} stale cache entries", evicted);
        }
    }

    fn schedule_refresh(&self, group: &str, normalized: TimeRange, key: CacheKey) -> bool {
        let service = self.clone();
        let group = group.to_string();
        let task_key = key.clone();

        self.state.refresh.enqueue(key, async move {
            match service.fetch_group(&group, &normalized).await? {
                Some(results) => {
                    info!("Refreshed coverage for group {} ({} sites)", group, results.len());
                    service.store(task_key, Arc::new(results));
                }
                None => debug!("Group {} has no mapped sites, nothing to refresh", group),
            }
            Ok(())
        })
    }

    /// One upstream round-trip for the whole group. `Ok(None)` when no
    /// site of the group has geometry.
    async fn fetch_group(
        &self,
        group: &str,
        normalized: &TimeRange,
    ) -> Result<Option<Vec<CoverageResult>>> {
        let sites = self.state.sites.find_sites_for_group(group).await?;
        let mapped: Vec<SiteGeometry> = sites.iter().filter_map(SiteRecord::geometry).collect();
        if mapped.is_empty() {
            debug!("Group {} has no mapped sites, skipping upstream", group);
            return Ok(None);
        }

        let upstream = &self.state.upstream_config;
        let payload = build_payload(&mapped, normalized, upstream);
        debug!(
            "Requesting coverage for {} of {} sites in group {}",
            mapped.len(),
            sites.len(),
            group
        );

        let response = self
            .state
            .upstream
            .post(&self.state.url, &payload, &upstream.headers)
            .await?;
        if !response.is_ok() {
            return Err(Error::UpstreamTransport(format!(
                "upstream returned HTTP {}",
                response.status
            )));
        }

        let body: Value = serde_json::from_str(&response.body)
            .map_err(|e| Error::UpstreamTransport(format!("unreadable response body: {e}")))?;
        // Only sites that were sent upstream may be reported.
        let reported = map_response(
            mapped.iter().map(|s| s.site_name.as_str()),
            &body,
            &upstream.response_key,
        )?;
        let group_names: Vec<&str> = sites.iter().map(|s| s.site_name.as_str()).collect();
        let results = filter_for_requested(&reported, &group_names);

        info!("Fetched coverage for group {} ({} sites)", group, results.len());
        Ok(Some(results))
    }
}
