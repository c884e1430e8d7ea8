//! Core domain types shared by every pipeline stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Well-known artifact names used as the inter-stage handoff surface.
pub mod artifact_names {
    /// Filtered stops table written by ingestion.
    pub const STOPS_FILTERED: &str = "stops_filtered.csv";
    /// Ingestion provenance written by ingestion.
    pub const INGESTION_CONFIG: &str = "ingestion_config.json";
    /// Sequencing result written by the sequence planner.
    pub const ORDERED_STOPS: &str = "ordered_stops.json";
    /// Aggregated routing result written by the route builder.
    pub const ROUTING_RESPONSE: &str = "routing_response.json";
    /// Exported GPX document.
    pub const TRACK_GPX: &str = "route.gpx";
}

// ---------------------------------------------------------------------------
// LatLng
// ---------------------------------------------------------------------------

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Both components are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

impl std::fmt::Display for LatLng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

impl std::str::FromStr for LatLng {
    type Err = String;

    /// Parse `"lat,lng"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| format!("expected 'lat,lng', got '{s}'"))?;
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| format!("invalid latitude '{}'", lat.trim()))?;
        let lng: f64 = lng
            .trim()
            .parse()
            .map_err(|_| format!("invalid longitude '{}'", lng.trim()))?;
        let point = Self { lat, lng };
        if !point.is_finite() {
            return Err(format!("coordinates must be finite, got '{s}'"));
        }
        Ok(point)
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// A single filtered collection point, as persisted in `stops_filtered.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRow {
    /// Stable identifier (source `fid` when present, else 1-based position).
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    /// Required on-site service time in seconds.
    pub service_s: u32,
    /// Total containers across the selected waste columns.
    pub containers: u32,
    /// Selected routes, comma-joined.
    pub w_route: String,
    /// Selected waste types, comma-joined.
    pub w_wastes: String,
    #[serde(default)]
    pub pueblo: Option<String>,
    #[serde(default)]
    pub municipio: Option<String>,
    #[serde(default)]
    pub fid: Option<String>,
}

/// Column layout detected from the input header row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedSchema {
    pub lat_col: String,
    pub lng_col: String,
    pub waste_cols: Vec<String>,
    pub route_cols: Vec<String>,
}

/// Provenance of an ingestion run, persisted as `ingestion_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    pub selected_wastes: Vec<String>,
    pub selected_routes: Vec<String>,
    pub base_stop_time: u32,
    pub time_per_additional_container: u32,
    /// Human-readable description of the service-time formula.
    pub counts_rule: String,
    /// Depot (start) coordinates.
    pub cocheras: LatLng,
    /// Treatment plant (end) coordinates.
    pub planta: LatLng,
    pub source_file: String,
    pub rows_total: usize,
    pub rows_selected: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<DetectedSchema>,
}

// ---------------------------------------------------------------------------
// Sequencing
// ---------------------------------------------------------------------------

/// A stop annotated with its position in the visiting order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedVia {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub service_s: u32,
    pub sequence: u32,
}

impl OrderedVia {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// Inputs handed from sequencing to routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingInputs {
    pub origin: LatLng,
    pub destination: LatLng,
    pub vias: Vec<OrderedVia>,
}

/// Metadata recorded alongside the sequencing result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderedStopsMeta {
    pub selected_wastes: Vec<String>,
    #[serde(default)]
    pub selected_routes: Vec<String>,
    /// Departure timestamp sent to the service (ISO-8601, `Z`).
    pub departure: String,
    pub mode: String,
    #[serde(rename = "improveFor")]
    pub improve_for: String,
}

/// Sequencing result, persisted as `ordered_stops.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderedStopsArtifact {
    /// Raw service response, kept for inspection.
    pub wps_raw: serde_json::Value,
    pub routing_inputs: RoutingInputs,
    pub meta: OrderedStopsMeta,
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Request policy for the routing service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub transport_mode: String,
    /// Value of the `return` parameter.
    pub return_fields: String,
    pub spans: String,
    pub departure_time: String,
    /// Stop duration used for vias whose service time is not positive.
    pub stop_duration_fallback_s: u32,
    pub allow_uturns: bool,
    pub avoid_difficult_turns: bool,
    /// Send `;radius=` instead of `;snapRadius=`.
    pub use_radius_instead_of_snap: bool,
    pub snap_or_radius_value: u32,
    /// Extra features to avoid in addition to the policy-derived ones.
    pub avoid_features: Vec<String>,
    /// Pass-through shaping points, written as `[[routing.shaping]]` tables.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shaping: Vec<ShapingPoint>,
    pub vehicle_profile: BTreeMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            transport_mode: "truck".into(),
            return_fields: "polyline,summary".into(),
            spans: "notices".into(),
            departure_time: "any".into(),
            stop_duration_fallback_s: 90,
            allow_uturns: true,
            avoid_difficult_turns: false,
            use_radius_instead_of_snap: false,
            snap_or_radius_value: 30,
            avoid_features: Vec::new(),
            shaping: Vec::new(),
            vehicle_profile: BTreeMap::new(),
        }
    }
}

/// A pass-through point inserted before the via at index `before`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShapingPoint {
    pub before: usize,
    pub point: LatLng,
}

impl RoutingConfig {
    /// Shaping point for via `index`; a later entry for the same index wins.
    pub fn shaping_before(&self, index: usize) -> Option<LatLng> {
        self.shaping
            .iter()
            .rev()
            .find(|s| s.before == index)
            .map(|s| s.point)
    }

    /// Add a shaping point, replacing any existing one for the same via.
    pub fn set_shaping(&mut self, before: usize, point: LatLng) {
        self.shaping.retain(|s| s.before != before);
        self.shaping.push(ShapingPoint { before, point });
    }

    /// Features actually sent as `avoid[features]`: dirt roads always, then
    /// U-turn and difficult-turn policy, then configured extras (deduplicated).
    pub fn effective_avoid_features(&self) -> Vec<String> {
        let mut features = vec!["dirtRoad".to_string()];
        if !self.allow_uturns {
            features.push("uTurns".into());
        }
        if self.avoid_difficult_turns {
            features.push("difficultTurns".into());
        }
        for extra in &self.avoid_features {
            if !features.contains(extra) {
                features.push(extra.clone());
            }
        }
        features
    }
}

/// Aggregated route totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteTotals {
    pub length_m: f64,
    pub duration_s: f64,
}

/// Notices attached to one route section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionNotices {
    pub section_index: usize,
    pub notices: Vec<serde_json::Value>,
}

/// Routing result, persisted as `routing_response.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingArtifact {
    pub generated_at: String,
    pub transport_mode: String,
    pub departure_time: String,
    #[serde(rename = "return")]
    pub return_fields: String,
    pub spans: String,
    pub avoid_features: Vec<String>,
    pub vehicle_params: BTreeMap<String, String>,
    pub origin: LatLng,
    pub destination: LatLng,
    pub via_count: usize,
    pub totals: RouteTotals,
    /// Section polylines in route order.
    pub section_polylines: Vec<String>,
    pub section_notices: Vec<SectionNotices>,
    pub raw: serde_json::Value,
}
