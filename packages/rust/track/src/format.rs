//! Display helpers for distances, durations and coordinates.

use wasteroute_shared::LatLng;

/// Meters as kilometers with two decimals.
pub fn fmt_km(meters: f64) -> String {
    format!("{:.2} km", meters / 1000.0)
}

/// Seconds as minutes with one decimal.
pub fn fmt_min(seconds: f64) -> String {
    format!("{:.1} min", seconds / 60.0)
}

/// Seconds as `1h 2m 3s`, `2m 3s` or `3s`.
pub fn fmt_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Coordinates with six decimals.
pub fn fmt_lat_lng(point: LatLng) -> String {
    format!("{:.6},{:.6}", point.lat, point.lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats() {
        assert_eq!(fmt_km(3000.0), "3.00 km");
        assert_eq!(fmt_min(150.0), "2.5 min");
        assert_eq!(fmt_hms(3723.9), "1h 2m 3s");
        assert_eq!(fmt_hms(125.0), "2m 5s");
        assert_eq!(fmt_hms(7.0), "7s");
        assert_eq!(fmt_hms(f64::NAN), "0s");
        assert_eq!(fmt_lat_lng(LatLng::new(40.5, -3.25)), "40.500000,-3.250000");
    }
}
