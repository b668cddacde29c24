//! Request body for the upstream coverage service.

use chrono::{DateTime, SecondsFormat, Utc};
use common::config::UpstreamConfig;
use common::{SiteGeometry, TimeRange};
use serde_json::{json, Map, Value};

/// UTC, millisecond precision, `Z` suffix.
pub fn iso_millis(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the request body using the configured field names.
///
/// WKT and site name arrays are index-aligned.
pub fn build_payload(sites: &[SiteGeometry], range: &TimeRange, upstream: &UpstreamConfig) -> Value {
    let wkts: Vec<&str> = sites.iter().map(|s| s.geometry_wkt.as_str()).collect();
    let names: Vec<&str> = sites.iter().map(|s| s.site_name.as_str()).collect();

    let mut geometries = Map::new();
    geometries.insert(upstream.geometry_inner_key.clone(), json!(wkts));
    geometries.insert(upstream.site_name_key.clone(), json!(names));

    let mut time_range = Map::new();
    time_range.insert(
        upstream.time_range_inner_key.clone(),
        json!({
            "From": iso_millis(&range.from),
            "To": iso_millis(&range.to),
        }),
    );

    let mut body = Map::new();
    body.insert(upstream.geometry_outer_key.clone(), Value::Object(geometries));
    body.insert(upstream.time_range_outer_key.clone(), Value::Object(time_range));
    Value::Object(body)
}
