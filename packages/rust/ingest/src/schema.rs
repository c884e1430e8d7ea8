//! Header-position based column detection.
//!
//! Layout convention of the collection-point sheets:
//! - column 0: latitude, column 1: longitude
//! - columns 2..8: waste-type container counts
//! - columns 8..18: route/zone membership flags

use std::sync::LazyLock;

use regex::Regex;

use wasteroute_shared::DetectedSchema;

const WASTE_SLOTS: std::ops::Range<usize> = 2..8;
const ROUTE_SLOTS: std::ops::Range<usize> = 8..18;

/// Auto-generated placeholder names (`_1`, `_2`, ...).
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^_\d+$").expect("placeholder regex"));

/// Whether a header carries no usable name.
pub fn header_is_blank(header: &str) -> bool {
    header.trim().is_empty() || header.starts_with("Unnamed:") || PLACEHOLDER_RE.is_match(header)
}

/// Detect coordinate, waste and route columns from the header row.
pub fn detect_schema(headers: &[String]) -> DetectedSchema {
    let named = |range: std::ops::Range<usize>| -> Vec<String> {
        headers
            .iter()
            .skip(range.start)
            .take(range.len())
            .filter(|h| !header_is_blank(h))
            .cloned()
            .collect()
    };

    DetectedSchema {
        lat_col: headers.first().cloned().unwrap_or_else(|| "lat".into()),
        lng_col: headers.get(1).cloned().unwrap_or_else(|| "lng".into()),
        waste_cols: named(WASTE_SLOTS),
        route_cols: named(ROUTE_SLOTS),
    }
}

/// Index of the first header equal to or containing `name`, case-insensitively.
pub(crate) fn find_optional_column(headers: &[String], name: &str) -> Option<usize> {
    let needle = name.to_lowercase();
    headers
        .iter()
        .position(|h| h.to_lowercase().contains(&needle))
}

/// Index of `name` within the given slot range of the header row.
pub(crate) fn slot_index(headers: &[String], name: &str, waste: bool) -> Option<usize> {
    let range = if waste { WASTE_SLOTS } else { ROUTE_SLOTS };
    headers
        .iter()
        .enumerate()
        .skip(range.start)
        .take(range.len())
        .find(|(_, h)| h.as_str() == name)
        .map(|(i, _)| i)
}
