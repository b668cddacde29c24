//! Result selection helpers.

use std::collections::HashMap;

use common::{CoverStatus, CoverageResult};

/// NoData for every name, in order.
pub fn no_data_for<S: AsRef<str>>(site_names: &[S]) -> Vec<CoverageResult> {
    site_names
        .iter()
        .map(|name| CoverageResult::no_data(name.as_ref()))
        .collect()
}

/// Pick `requested` out of `all`, keeping the request's length and order.
/// Names not present in `all` become NoData.
pub fn filter_for_requested<S: AsRef<str>>(all: &[CoverageResult], requested: &[S]) -> Vec<CoverageResult> {
    let by_name: HashMap<&str, &CoverageResult> =
        all.iter().map(|r| (r.site_name.as_str(), r)).collect();

    requested
        .iter()
        .map(|name| {
            let name = name.as_ref();
            by_name
                .get(name)
                .map(|r| (*r).clone())
                .unwrap_or_else(|| CoverageResult::no_data(name))
        })
        .collect()
}

/// Keep results whose status is in `wanted`; NoData counts as Empty.
/// An empty `wanted` keeps everything.
pub fn filter_by_cover_status(results: &[CoverageResult], wanted: &[CoverStatus]) -> Vec<CoverageResult> {
    if wanted.is_empty() {
        return results.to_vec();
    }
    results
        .iter()
        .filter(|r| wanted.contains(&r.status().unwrap_or(CoverStatus::Empty)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> Vec<CoverageResult> {
        vec![
            CoverageResult::reported("a", CoverStatus::Full, "https://r/a"),
            CoverageResult::reported("b", CoverStatus::Partial, "https://r/b"),
            CoverageResult::no_data("c"),
        ]
    }

    #[test]
    fn test_filter_for_requested_keeps_request_order() {
        let picked = filter_for_requested(&group(), &["c", "zzz", "a"]);
        let names: Vec<&str> = picked.iter().map(|r| r.site_name.as_str()).collect();

        assert_eq!(names, ["c", "zzz", "a"]);
        assert!(picked[1].is_no_data());
        assert_eq!(picked[2].status(), Some(CoverStatus::Full));
    }

    #[test]
    fn test_filter_for_requested_repeats_duplicates() {
        let picked = filter_for_requested(&group(), &["b", "b"]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0], picked[1]);
    }

    #[test]
    fn test_filter_by_cover_status_treats_no_data_as_empty() {
        let empty = filter_by_cover_status(&group(), &[CoverStatus::Empty]);
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].site_name, "c");

        let some = filter_by_cover_status(&group(), &[CoverStatus::Full, CoverStatus::Partial]);
        assert_eq!(some.len(), 2);

        assert_eq!(filter_by_cover_status(&group(), &[]).len(), 3);
    }

    #[test]
    fn test_no_data_for() {
        let rows = no_data_for(&["x", "y"]);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(CoverageResult::is_no_data));
    }
}
