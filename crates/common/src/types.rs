//! Domain types shared across coverwatch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Label used on the wire and in output when a site has no coverage data.
pub const NO_DATA: &str = "no data available";

// ── Coverage ──────────────────────────────────────────────────────────

/// Coverage classification reported by the upstream analytics service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoverStatus {
    Full,
    Partial,
    Empty,
}

impl CoverStatus {
    /// Parse the exact upstream spelling. Anything else is not a status.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "Full" => Some(Self::Full),
            "Partial" => Some(Self::Partial),
            "Empty" => Some(Self::Empty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Partial => "Partial",
            Self::Empty => "Empty",
        }
    }
}

impl fmt::Display for CoverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoverStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            "empty" => Ok(Self::Empty),
            other => Err(format!(
                "unknown cover status '{other}' (expected full, partial or empty)"
            )),
        }
    }
}

/// Coverage of one site: either a full upstream report or nothing at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coverage {
    Reported {
        status: CoverStatus,
        report_link: String,
    },
    NoData,
}

/// One output row per requested site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageResult {
    pub site_name: String,
    pub coverage: Coverage,
}

impl CoverageResult {
    pub fn reported(
        site_name: impl Into<String>,
        status: CoverStatus,
        report_link: impl Into<String>,
    ) -> Self {
        Self {
            site_name: site_name.into(),
            coverage: Coverage::Reported {
                status,
                report_link: report_link.into(),
            },
        }
    }

    pub fn no_data(site_name: impl Into<String>) -> Self {
        Self {
            site_name: site_name.into(),
            coverage: Coverage::NoData,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self.coverage, Coverage::NoData)
    }

    pub fn status(&self) -> Option<CoverStatus> {
        match &self.coverage {
            Coverage::Reported { status, .. } => Some(*status),
            Coverage::NoData => None,
        }
    }

    pub fn cover_status_label(&self) -> &str {
        match &self.coverage {
            Coverage::Reported { status, .. } => status.as_str(),
            Coverage::NoData => NO_DATA,
        }
    }

    pub fn report_link(&self) -> &str {
        match &self.coverage {
            Coverage::Reported { report_link, .. } => report_link,
            Coverage::NoData => NO_DATA,
        }
    }
}

impl Serialize for CoverageResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Row<'a> {
            site_name: &'a str,
            cover_status: &'a str,
            report_link: &'a str,
        }

        Row {
            site_name: &self.site_name,
            cover_status: self.cover_status_label(),
            report_link: self.report_link(),
        }
        .serialize(serializer)
    }
}

// ── Time ──────────────────────────────────────────────────────────────

/// A closed time interval in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The interval of `secs` seconds ending at `now`.
    pub fn trailing(now: DateTime<Utc>, secs: u64) -> Self {
        let from = i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self { from, to: now }
    }
}

// ── Sites ─────────────────────────────────────────────────────────────

/// A site as yielded by the site store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub site_name: String,
    /// Footprint polygon as WKT; `None` when the site was never mapped.
    pub geometry_wkt: Option<String>,
    pub refresh_seconds: Option<u64>,
    pub group_default_refresh_seconds: u64,
}

impl SiteRecord {
    /// Site-specific refresh interval, else the group default.
    pub fn effective_refresh_seconds(&self) -> u64 {
        self.refresh_seconds
            .unwrap_or(self.group_default_refresh_seconds)
    }

    /// Upstream input for this site, if it has usable geometry.
    pub fn geometry(&self) -> Option<SiteGeometry> {
        let wkt = self.geometry_wkt.as_deref()?;
        if wkt.trim().is_empty() {
            return None;
        }
        Some(SiteGeometry {
            site_name: self.site_name.clone(),
            geometry_wkt: wkt.to_string(),
            refresh_seconds: self.effective_refresh_seconds(),
        })
    }
}

/// The minimal per-site input to one upstream coverage request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteGeometry {
    pub site_name: String,
    pub geometry_wkt: String,
    pub refresh_seconds: u64,
}
