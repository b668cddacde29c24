//! Upstream response parsing.

use std::collections::HashMap;

use common::{CoverStatus, CoverageResult, Error, Result};
use serde_json::Value;
use tracing::debug;

/// Map a 200 response body onto one result per name in `site_names`.
///
/// The array under `response_key` is mandatory; anything else is a
/// contract error. Items missing a non-empty `siteName`, a known
/// `status`, or a non-empty `projectLink` are skipped. When a name
/// repeats, the last item wins. Names without an item map to NoData.
pub fn map_response<'a, I>(site_names: I, body: &Value, response_key: &str) -> Result<Vec<CoverageResult>>
where
    I: IntoIterator<Item = &'a str>,
{
    let items = body
        .get(response_key)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let found = match body.get(response_key) {
                None => "nothing".to_string(),
                Some(other) => json_kind(other).to_string(),
            };
            let keys: Vec<&str> = body
                .as_object()
                .map(|obj| obj.keys().map(String::as_str).collect())
                .unwrap_or_default();
            Error::UpstreamContract(format!(
                "expected array at key '{response_key}', found {found} (top-level keys: {keys:?})"
            ))
        })?;

    let mut reported: HashMap<&str, (CoverStatus, &str)> = HashMap::with_capacity(items.len());
    let mut skipped = 0usize;
    for item in items {
        match parse_item(item) {
            Some((name, status, link)) => {
                reported.insert(name, (status, link));
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!("Ignored {} malformed coverage items", skipped);
    }

    Ok(site_names
        .into_iter()
        .map(|name| match reported.get(name) {
            Some((status, link)) => CoverageResult::reported(name, *status, *link),
            None => CoverageResult::no_data(name),
        })
        .collect())
}

fn parse_item(item: &Value) -> Option<(&str, CoverStatus, &str)> {
    let name = non_empty_str(item, "siteName")?;
    let status = item
        .get("status")
        .and_then(Value::as_str)
        .and_then(CoverStatus::from_wire)?;
    let link = non_empty_str(item, "projectLink")?;
    Some((name, status, link))
}

fn non_empty_str<'v>(item: &'v Value, key: &str) -> Option<&'v str> {
    item.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
