//! Best-effort latitude/longitude extraction from map-service URLs

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

use crate::types::Coordinates;

const NUMBER: &str = r"[-+]?\d+(?:\.\d+)?";

/// Place marker encoding, e.g. `!3d-3.3922222!4d-51.8525278`
static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"!3d({NUMBER})!4d({NUMBER})")).unwrap());

/// Viewport centre, e.g. `/@-3.39,-51.85,12z`
static VIEWPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"@({NUMBER}),\s*({NUMBER})")).unwrap());

/// Query parameter, e.g. `?ll=-3.39,-51.85`
static QUERY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"[?&]ll=({NUMBER}),\s*({NUMBER})")).unwrap());

/// Extract coordinates from a map URL.
///
/// Patterns are tried in priority order: place marker, viewport centre,
/// `ll=` query parameter. When the marker pattern occurs more than once the
/// last occurrence is used; in observed URLs the trailing marker is the
/// pinned place while earlier ones belong to the surrounding view. That is
/// an empirical rule, not something the URL format promises.
///
/// Out-of-range values are returned as-is with a warning.
pub fn extract_coordinates(url: &str) -> Option<Coordinates> {
    let coordinates = MARKER_RE
        .captures_iter(url)
        .filter_map(|caps| pair(&caps))
        .last()
        .or_else(|| VIEWPORT_RE.captures(url).and_then(|caps| pair(&caps)))
        .or_else(|| QUERY_RE.captures(url).and_then(|caps| pair(&caps)))?;

    if !coordinates.is_in_range() {
        warn!("Coordinates {} out of range in {}", coordinates, url);
    }
    Some(coordinates)
}

fn pair(caps: &regex::Captures) -> Option<Coordinates> {
    let lat = caps.get(1)?.as_str().parse().ok()?;
    let lng = caps.get(2)?.as_str().parse().ok()?;
    Some(Coordinates::new(lat, lng))
}
