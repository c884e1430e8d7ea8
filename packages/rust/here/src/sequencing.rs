//! Waypoint-sequencing request/response contract.
//!
//! The request lists the depot as `start`, every stop as a numbered
//! `destinationN` and the plant as `end`. The service echoes each stop id
//! back (prefixed with `stop`) together with its position in the tour.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use wasteroute_shared::{LatLng, OrderedVia, Result, RoutePlannerError, StopRow};

use crate::encode_component;

/// Service time assumed for stops without a positive one.
pub const DEFAULT_SERVICE_S: u32 = 45;

const START_ID: &str = "Cocheras";
const END_ID: &str = "Planta";
const STOP_MARKER: &str = "stop";
const DEPARTURE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A stop after sanitation, as sent to the sequencing service.
#[derive(Debug, Clone, PartialEq)]
pub struct ViaStop {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub service_s: u32,
}

/// Tunables of the sequencing call.
#[derive(Debug, Clone)]
pub struct SequenceOptions {
    pub improve_for: String,
    pub mode: String,
    /// Departure timestamp; `None` means now.
    pub departure: Option<String>,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            improve_for: "time".into(),
            mode: "fastest;truck;traffic:disabled".into(),
            departure: None,
        }
    }
}

/// A fully assembled sequencing request.
#[derive(Debug, Clone)]
pub struct SequenceRequest {
    pub url: String,
    pub improve_for: String,
    pub mode: String,
    pub departure: String,
    /// Stops in `destinationN` order.
    pub stops: Vec<ViaStop>,
}

// ---------------------------------------------------------------------------
// Sanitation
// ---------------------------------------------------------------------------

/// Drop stops with non-finite coordinates, default non-positive service
/// times and assign ids to blank ones.
pub fn sanitize_stops(stops: &[StopRow]) -> Vec<ViaStop> {
    let mut out: Vec<ViaStop> = Vec::with_capacity(stops.len());
    for stop in stops {
        if !stop.lat.is_finite() || !stop.lng.is_finite() {
            debug!(id = %stop.id, "dropping stop with invalid coordinates");
            continue;
        }
        let service_s = if stop.service_s == 0 {
            DEFAULT_SERVICE_S
        } else {
            stop.service_s
        };
        let id = match stop.id.trim() {
            "" => (out.len() + 1).to_string(),
            trimmed => trimmed.to_string(),
        };
        out.push(ViaStop {
            id,
            lat: stop.lat,
            lng: stop.lng,
            service_s,
        });
    }
    out
}

/// Rename repeated ids to `{id}___{n}`, n being the occurrence count.
pub fn dedupe_ids(stops: Vec<ViaStop>) -> Vec<ViaStop> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    stops
        .into_iter()
        .map(|mut stop| {
            let n = seen.entry(stop.id.clone()).or_default();
            *n += 1;
            if *n > 1 {
                stop.id = format!("{}___{}", stop.id, n);
            }
            stop
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

fn destination_param(index: usize, stop: &ViaStop) -> String {
    format!(
        "destination{}={STOP_MARKER}{};{:.6},{:.6};st:{}",
        index + 1,
        encode_component(&stop.id),
        stop.lat,
        stop.lng,
        stop.service_s.max(1)
    )
}

/// Assemble the sequencing URL for `stops` between `depot` and `plant`.
///
/// Fails before any network traffic when no stop survives sanitation or
/// when the destination numbering of the assembled URL is not contiguous.
pub fn build_sequence_request(
    endpoint: &str,
    depot: LatLng,
    plant: LatLng,
    stops: &[StopRow],
    api_key: &str,
    options: &SequenceOptions,
) -> Result<SequenceRequest> {
    if !depot.is_finite() || !plant.is_finite() {
        return Err(RoutePlannerError::validation(
            "depot and plant coordinates must be finite numbers",
        ));
    }

    let valid = dedupe_ids(sanitize_stops(stops));
    info!(
        before = stops.len(),
        after = valid.len(),
        "sanitized stops for sequencing"
    );
    if valid.is_empty() {
        return Err(RoutePlannerError::validation(
            "no valid stops after sanitization; check the ingestion filters and data",
        ));
    }

    let departure = match options.departure.as_deref() {
        Some(raw) => normalize_departure(raw)?,
        None => Utc::now().format(DEPARTURE_FORMAT).to_string(),
    };

    let mut parts = Vec::with_capacity(valid.len() + 6);
    parts.push(format!("start={START_ID};{depot}"));
    for (i, stop) in valid.iter().enumerate() {
        parts.push(destination_param(i, stop));
    }
    parts.push(format!("end={END_ID};{plant}"));
    parts.push(format!("improveFor={}", options.improve_for));
    parts.push(format!("mode={}", options.mode));
    parts.push(format!("departure={departure}"));
    parts.push(format!("apiKey={api_key}"));

    let url = format!("{endpoint}?{}", parts.join("&"));
    check_destination_numbering(&url, valid.len())?;

    Ok(SequenceRequest {
        url,
        improve_for: options.improve_for.clone(),
        mode: options.mode.clone(),
        departure,
        stops: valid,
    })
}

/// Re-format a user departure as UTC `YYYY-MM-DDTHH:MM:SSZ`.
///
/// Accepts RFC 3339 with any offset, or a bare date-time taken as UTC.
pub fn normalize_departure(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let utc = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
            .map_err(|_| {
                RoutePlannerError::validation(format!(
                    "invalid departure '{raw}': expected ISO-8601 such as 2024-05-01T06:00:00Z"
                ))
            })?
            .and_utc(),
    };
    Ok(utc.format(DEPARTURE_FORMAT).to_string())
}

/// Verify the URL carries exactly `destination1..=destination{expected}`.
pub fn check_destination_numbering(url: &str, expected: usize) -> Result<()> {
    let parsed = Url::parse(url)
        .map_err(|e| RoutePlannerError::protocol(format!("sequencing URL is invalid: {e}")))?;

    let mut numbers: Vec<usize> = Vec::new();
    for (key, _) in parsed.query_pairs() {
        if let Some(rest) = key.strip_prefix("destination") {
            let n = rest.parse::<usize>().map_err(|_| {
                RoutePlannerError::protocol(format!("bad destination parameter '{key}'"))
            })?;
            numbers.push(n);
        }
    }
    numbers.sort_unstable();

    let contiguous = numbers.len() == expected
        && numbers.iter().enumerate().all(|(i, &n)| n == i + 1);
    if !contiguous {
        return Err(RoutePlannerError::protocol(format!(
            "bad destination numbering: expected destination1..destination{expected}, got {numbers:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Rebuild the ordered via list from a sequencing response.
///
/// Every sanitized stop must come back exactly once and the sequence
/// numbers must be contiguous, starting at 0 or 1.
pub fn parse_sequence_response(raw: &Value, stops: &[ViaStop]) -> Result<Vec<OrderedVia>> {
    let waypoints = raw
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .and_then(|first| first.get("waypoints"))
        .and_then(Value::as_array)
        .filter(|w| !w.is_empty())
        .ok_or_else(|| {
            RoutePlannerError::protocol("sequencing response has no results[0].waypoints")
        })?;

    let mut ordered = Vec::with_capacity(stops.len());
    for waypoint in waypoints {
        let Some(id) = waypoint.get("id").and_then(Value::as_str) else {
            continue;
        };
        if id == START_ID || id == END_ID {
            continue;
        }

        let echoed = id.strip_prefix(STOP_MARKER).unwrap_or(id);
        let stop = stops
            .iter()
            .find(|s| s.id == echoed || encode_component(&s.id) == echoed)
            .ok_or_else(|| RoutePlannerError::protocol(format!("Stop {echoed} not found")))?;

        let sequence = waypoint
            .get("sequence")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                RoutePlannerError::protocol(format!("waypoint {id} has no valid sequence"))
            })?;

        ordered.push(OrderedVia {
            id: stop.id.clone(),
            lat: stop.lat,
            lng: stop.lng,
            service_s: stop.service_s,
            sequence,
        });
    }

    ordered.sort_by_key(|via| via.sequence);
    validate_order(&ordered, stops)?;
    Ok(ordered)
}

fn validate_order(ordered: &[OrderedVia], stops: &[ViaStop]) -> Result<()> {
    let mut seen = HashSet::new();
    for via in ordered {
        if !seen.insert(via.id.as_str()) {
            return Err(RoutePlannerError::protocol(format!(
                "stop {} appears more than once in the sequence",
                via.id
            )));
        }
    }
    if let Some(missing) = stops.iter().find(|s| !seen.contains(s.id.as_str())) {
        return Err(RoutePlannerError::protocol(format!(
            "stop {} is missing from the sequence",
            missing.id
        )));
    }

    let base = ordered.first().map(|v| v.sequence).unwrap_or(0);
    let contiguous = base <= 1
        && ordered
            .iter()
            .enumerate()
            .all(|(i, via)| via.sequence as usize == base as usize + i);
    if !contiguous {
        let numbers: Vec<u32> = ordered.iter().map(|v| v.sequence).collect();
        return Err(RoutePlannerError::protocol(format!(
            "sequence numbers are not contiguous: {numbers:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, lat: f64, lng: f64, service_s: u32) -> StopRow {
        StopRow {
            id: id.into(),
            lat,
            lng,
            service_s,
            containers: 1,
            w_route: "Lunes".into(),
            w_wastes: "Papel".into(),
            pueblo: None,
            municipio: None,
            fid: None,
        }
    }

    fn options() -> SequenceOptions {
        SequenceOptions {
            departure: Some("2024-05-01T06:00:00Z".into()),
            ..Default::default()
        }
    }

    const ENDPOINT: &str = "https://wps.example.com/v8/findsequence2";

    #[test]
    fn sanitation_and_dedupe() {
        let stops = vec![
            row("a", 40.0, -3.0, 0),
            row("", 40.1, -3.1, 60),
            row("a", f64::NAN, -3.2, 60),
            row("a", 40.3, -3.3, 90),
            row("a", 40.4, -3.4, 90),
        ];
        let out = dedupe_ids(sanitize_stops(&stops));
        let ids: Vec<&str> = out.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "2", "a___2", "a___3"]);
        assert_eq!(out[0].service_s, DEFAULT_SERVICE_S);
        assert_eq!(out[1].service_s, 60);
    }

    #[test]
    fn request_encodes_numbered_destinations() {
        let stops = vec![row("1", 40.1234567, -3.5, 65), row("B 2", 40.2, -3.6, 45)];
        let req = build_sequence_request(
            ENDPOINT,
            LatLng::new(40.5, -3.7),
            LatLng::new(40.6, -3.8),
            &stops,
            "KEY",
            &options(),
        )
        .expect("request");

        assert_eq!(
            req.url,
            "https://wps.example.com/v8/findsequence2?start=Cocheras;40.5,-3.7\
             &destination1=stop1;40.123457,-3.500000;st:65\
             &destination2=stopB%202;40.200000,-3.600000;st:45\
             &end=Planta;40.6,-3.8&improveFor=time&mode=fastest;truck;traffic:disabled\
             &departure=2024-05-01T06:00:00Z&apiKey=KEY"
        );
        assert_eq!(req.stops.len(), 2);
        assert_eq!(req.departure, "2024-05-01T06:00:00Z");
    }

    #[test]
    fn default_departure_has_second_precision() {
        let stops = vec![row("1", 40.0, -3.0, 45)];
        let req = build_sequence_request(
            ENDPOINT,
            LatLng::new(40.5, -3.7),
            LatLng::new(40.6, -3.8),
            &stops,
            "KEY",
            &SequenceOptions::default(),
        )
        .expect("request");
        assert_eq!(req.departure.len(), "2024-05-01T06:00:00Z".len());
        assert!(req.departure.ends_with('Z'));
    }

    #[test]
    fn departure_offsets_are_converted_to_utc() {
        assert_eq!(
            normalize_departure("2024-05-01T08:00:00+02:00").expect("offset"),
            "2024-05-01T06:00:00Z"
        );
        assert_eq!(
            normalize_departure("2024-05-01T06:00:00").expect("naive"),
            "2024-05-01T06:00:00Z"
        );
        assert!(normalize_departure("tomorrow").is_err());

        let stops = vec![row("1", 40.0, -3.0, 45)];
        let req = build_sequence_request(
            ENDPOINT,
            LatLng::new(40.5, -3.7),
            LatLng::new(40.6, -3.8),
            &stops,
            "KEY",
            &SequenceOptions {
                departure: Some("2024-05-01T08:00:00.500+02:00".into()),
                ..SequenceOptions::default()
            },
        )
        .expect("request");
        assert!(req.url.contains("&departure=2024-05-01T06:00:00Z&"));
        assert!(!req.url.contains('+'));
    }

    #[test]
    fn no_valid_stops_is_validation_error() {
        let stops = vec![row("1", f64::INFINITY, -3.0, 45)];
        let err = build_sequence_request(
            ENDPOINT,
            LatLng::new(40.5, -3.7),
            LatLng::new(40.6, -3.8),
            &stops,
            "KEY",
            &options(),
        )
        .unwrap_err();
        assert!(matches!(err, RoutePlannerError::Validation { .. }));
    }

    #[test]
    fn numbering_gap_is_rejected() {
        let url = "https://x.example/seq?destination1=a&destination3=b&apiKey=k";
        let err = check_destination_numbering(url, 2).unwrap_err();
        assert!(matches!(err, RoutePlannerError::Protocol { .. }));

        let ok = "https://x.example/seq?destination2=a&destination1=b&apiKey=k";
        assert!(check_destination_numbering(ok, 2).is_ok());
    }

    fn via_stops() -> Vec<ViaStop> {
        dedupe_ids(sanitize_stops(&[
            row("1", 40.0, -3.0, 65),
            row("2", 40.1, -3.1, 45),
        ]))
    }

    #[test]
    fn response_orders_by_sequence() {
        let raw = json!({
            "results": [{
                "waypoints": [
                    {"id": "Cocheras", "sequence": 0},
                    {"id": "stop1", "sequence": 2},
                    {"id": "stop2", "sequence": 1},
                    {"id": "Planta", "sequence": 3},
                ]
            }]
        });
        let ordered = parse_sequence_response(&raw, &via_stops()).expect("parse");
        let ids: Vec<&str> = ordered.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(ordered[1].service_s, 65);
        assert_eq!(ordered[0].sequence, 1);
    }

    #[test]
    fn zero_based_sequence_is_accepted() {
        let raw = json!({"results": [{"waypoints": [
            {"id": "stop1", "sequence": 1},
            {"id": "stop2", "sequence": 0},
        ]}]});
        let ordered = parse_sequence_response(&raw, &via_stops()).expect("parse");
        assert_eq!(ordered[0].id, "2");
        assert_eq!(ordered[1].id, "1");
    }

    #[test]
    fn encoded_ids_are_matched() {
        let stops = dedupe_ids(sanitize_stops(&[row("B 2", 40.0, -3.0, 45)]));
        let raw = json!({"results": [{"waypoints": [{"id": "stopB%202", "sequence": 1}]}]});
        let ordered = parse_sequence_response(&raw, &stops).expect("parse");
        assert_eq!(ordered[0].id, "B 2");
    }

    #[test]
    fn malformed_responses_are_protocol_errors() {
        let stops = via_stops();
        for raw in [
            json!({}),
            json!({"results": []}),
            json!({"results": [{"waypoints": []}]}),
            // unknown id
            json!({"results": [{"waypoints": [
                {"id": "stop1", "sequence": 1}, {"id": "stop9", "sequence": 2}]}]}),
            // missing stop
            json!({"results": [{"waypoints": [{"id": "stop1", "sequence": 1}]}]}),
            // duplicate stop
            json!({"results": [{"waypoints": [
                {"id": "stop1", "sequence": 1}, {"id": "stop1", "sequence": 2},
                {"id": "stop2", "sequence": 3}]}]}),
            // gap
            json!({"results": [{"waypoints": [
                {"id": "stop1", "sequence": 1}, {"id": "stop2", "sequence": 3}]}]}),
        ] {
            let err = parse_sequence_response(&raw, &stops).unwrap_err();
            assert!(
                matches!(err, RoutePlannerError::Protocol { .. }),
                "{raw}: {err:?}"
            );
        }
    }

    #[test]
    fn unknown_stop_is_named() {
        let raw = json!({"results": [{"waypoints": [{"id": "stop77", "sequence": 1}]}]});
        let err = parse_sequence_response(&raw, &via_stops()).unwrap_err();
        assert!(err.to_string().contains("Stop 77 not found"));
    }
}
