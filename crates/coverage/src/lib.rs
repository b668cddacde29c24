//! Time-windowed coverage lookups with a TTL cache and background refresh.

pub mod cache;
pub mod filter;
pub mod mapper;
pub mod payload;
pub mod refresh;
pub mod service;
pub mod store;
pub mod upstream;
pub mod window;

pub use cache::{Lookup, TtlCache};
pub use filter::{filter_by_cover_status, filter_for_requested, no_data_for};
pub use refresh::{RefreshQueue, RefreshStats};
pub use service::{CacheKey, CoverageService};
pub use store::{SiteStore, StaticSiteStore};
pub use upstream::{CoverageUpstream, UpstreamResponse};
pub use window::{Direction, Granularity, TimeWindow, WindowCalculator};
