//! Section stitching: decode, decimate and join without duplicate seams.

use flexpolyline::Polyline;
use tracing::{debug, warn};

use wasteroute_shared::LatLng;

/// Points closer than this in both coordinates are the same seam point.
pub const SEAM_TOLERANCE: f64 = 1e-7;

/// Keep every `every`-th point plus the last one.
///
/// Lines of two points or fewer, and `every <= 1`, are returned unchanged.
pub fn decimate(points: Vec<LatLng>, every: usize) -> Vec<LatLng> {
    if every <= 1 || points.len() <= 2 {
        return points;
    }
    let last_index = points.len() - 1;
    let last = points[last_index];
    let mut out: Vec<LatLng> = points.into_iter().step_by(every).collect();
    if last_index % every != 0 {
        out.push(last);
    }
    out
}

fn same_point(a: &LatLng, b: &LatLng) -> bool {
    (a.lat - b.lat).abs() < SEAM_TOLERANCE && (a.lng - b.lng).abs() < SEAM_TOLERANCE
}

/// Append `next` to `acc`, dropping its first point when it repeats the
/// current last point.
pub fn append_no_dupes(acc: &mut Vec<LatLng>, next: Vec<LatLng>) {
    let skip = match (acc.last(), next.first()) {
        (Some(last), Some(first)) => usize::from(same_point(last, first)),
        _ => 0,
    };
    acc.extend(next.into_iter().skip(skip));
}

/// Why a section polyline was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SectionDecodeError {
    #[error("invalid flexible polyline: {0:?}")]
    Codec(flexpolyline::Error),

    #[error("decoded point {lat},{lng} is outside WGS84 bounds")]
    OutOfRange { lat: f64, lng: f64 },
}

/// Decode one flexible polyline into 2D points, dropping any third dimension.
///
/// Overflowing deltas decode to points outside WGS84 bounds and are rejected.
pub fn decode_section(encoded: &str) -> Result<Vec<LatLng>, SectionDecodeError> {
    let points: Vec<LatLng> = match Polyline::decode(encoded).map_err(SectionDecodeError::Codec)? {
        Polyline::Data2d { coordinates, .. } => coordinates
            .into_iter()
            .map(|(lat, lng)| LatLng::new(lat, lng))
            .collect(),
        Polyline::Data3d { coordinates, .. } => coordinates
            .into_iter()
            .map(|(lat, lng, _)| LatLng::new(lat, lng))
            .collect(),
    };
    if let Some(bad) = points
        .iter()
        .find(|p| !(p.is_finite() && p.lat.abs() <= 90.0 && p.lng.abs() <= 180.0))
    {
        return Err(SectionDecodeError::OutOfRange {
            lat: bad.lat,
            lng: bad.lng,
        });
    }
    Ok(points)
}

/// A stitched track and the sections that could not be decoded.
#[derive(Debug, Clone, Default)]
pub struct MergedTrack {
    pub points: Vec<LatLng>,
    /// Indices of sections skipped because their polyline did not decode.
    pub skipped_sections: Vec<usize>,
}

/// Decode every section, decimate each and join them into one line.
pub fn merge_sections(polylines: &[String], decimate_every: usize) -> MergedTrack {
    let mut merged = MergedTrack::default();
    for (index, encoded) in polylines.iter().enumerate() {
        match decode_section(encoded) {
            Ok(points) => {
                let decoded = points.len();
                let kept = decimate(points, decimate_every);
                debug!(section = index, decoded, kept = kept.len(), "section decoded");
                append_no_dupes(&mut merged.points, kept);
            }
            Err(e) => {
                warn!(section = index, error = %e, "failed to decode section polyline, skipping");
                merged.skipped_sections.push(index);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexpolyline::Precision;

    fn encode(coordinates: &[(f64, f64)]) -> String {
        Polyline::Data2d {
            coordinates: coordinates.to_vec(),
            precision2d: Precision::Digits5,
        }
        .encode()
        .expect("encode fixture")
    }

    fn line(n: usize) -> Vec<LatLng> {
        (0..n).map(|i| LatLng::new(i as f64, i as f64)).collect()
    }

    fn lats(points: &[LatLng]) -> Vec<f64> {
        points.iter().map(|p| p.lat).collect()
    }

    #[test]
    fn decimate_keeps_stride_and_last() {
        assert_eq!(lats(&decimate(line(10), 3)), vec![0.0, 3.0, 6.0, 9.0]);
        assert_eq!(lats(&decimate(line(11), 3)), vec![0.0, 3.0, 6.0, 9.0, 10.0]);
        assert_eq!(lats(&decimate(line(5), 1)), lats(&line(5)));
        assert_eq!(lats(&decimate(line(2), 5)), vec![0.0, 1.0]);
        assert!(decimate(Vec::new(), 4).is_empty());
    }

    #[test]
    fn seam_points_are_merged() {
        let mut acc = vec![LatLng::new(1.0, 1.0), LatLng::new(2.0, 2.0)];
        append_no_dupes(&mut acc, vec![LatLng::new(2.00000001, 2.0), LatLng::new(3.0, 3.0)]);
        assert_eq!(lats(&acc), vec![1.0, 2.0, 3.0]);

        append_no_dupes(&mut acc, vec![LatLng::new(3.001, 3.0)]);
        assert_eq!(acc.len(), 4);

        let mut empty = Vec::new();
        append_no_dupes(&mut empty, vec![LatLng::new(1.0, 1.0)]);
        assert_eq!(empty.len(), 1);
    }

    #[test]
    fn decodes_reference_polyline() {
        let points = decode_section("BFoz5xJ67i1B1B7PzIhaxL7Y").expect("decode");
        assert_eq!(points.len(), 4);
        assert!((points[0].lat - 50.10228).abs() < 1e-9);
        assert!((points[0].lng - 8.69821).abs() < 1e-9);
        assert!((points[3].lat - 50.09878).abs() < 1e-9);
        assert!((points[3].lng - 8.68752).abs() < 1e-9);
    }

    #[test]
    fn shared_join_point_counts_once() {
        let sections = vec![
            encode(&[(40.0, -3.0), (40.001, -3.002)]),
            encode(&[(40.001, -3.002), (40.003, -3.001)]),
        ];
        let merged = merge_sections(&sections, 1);
        assert_eq!(merged.points.len(), 2 + 2 - 1);
        assert!(merged.skipped_sections.is_empty());
        let last = merged.points[2];
        assert!((last.lat - 40.003).abs() < 1e-9);
        assert!((last.lng + 3.001).abs() < 1e-9);
    }

    #[test]
    fn undecodable_section_is_skipped() {
        let sections = vec![
            encode(&[(40.0, -3.0), (40.001, -3.002)]),
            "not a polyline!".to_string(),
            encode(&[(40.001, -3.002), (40.003, -3.001)]),
        ];
        let merged = merge_sections(&sections, 1);
        assert_eq!(merged.points.len(), 3);
        assert_eq!(merged.skipped_sections, vec![1]);
    }

    #[test]
    fn overflowing_deltas_skip_the_section() {
        // Three (2^63 - 2, 0) delta pairs at precision 5
        let huge = "BF8___________PA8___________PA8___________PA".to_string();
        assert!(matches!(
            decode_section(&huge),
            Err(SectionDecodeError::OutOfRange { .. }) | Err(SectionDecodeError::Codec(_))
        ));

        let sections = vec![encode(&[(40.0, -3.0), (40.001, -3.002)]), huge];
        let merged = merge_sections(&sections, 1);
        assert_eq!(merged.points.len(), 2);
        assert_eq!(merged.skipped_sections, vec![1]);
    }
}
