//! Route request assembly and response aggregation.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use wasteroute_shared::{
    LatLng, OrderedVia, Result, RouteTotals, RoutePlannerError, RoutingArtifact, RoutingConfig,
    SectionNotices, scrub_url,
};

use crate::encode_component;

/// URLs longer than this are flagged; the request is still sent.
pub const URL_LENGTH_WARN: usize = 14_000;

/// Role of a waypoint in the route request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaypointKind {
    Origin,
    Via,
    Destination,
}

impl WaypointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Origin => "origin",
            Self::Via => "via",
            Self::Destination => "destination",
        }
    }
}

/// Matching tolerance sent with a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Snap {
    /// `;snapRadius=R`
    SnapRadius(u32),
    /// `;radius=R`
    Radius(u32),
}

impl Snap {
    pub fn from_config(config: &RoutingConfig) -> Self {
        if config.use_radius_instead_of_snap {
            Self::Radius(config.snap_or_radius_value)
        } else {
            Self::SnapRadius(config.snap_or_radius_value)
        }
    }
}

/// Render one waypoint clause: `{kind}={lat},{lng};snap[;passThrough=true][!stopDuration=S]`.
pub fn waypoint_param(
    kind: WaypointKind,
    point: LatLng,
    snap: Snap,
    pass_through: bool,
    stop_duration: Option<u32>,
) -> String {
    let mut param = format!("{}={point}", kind.as_str());
    match snap {
        Snap::Radius(r) => param.push_str(&format!(";radius={r}")),
        Snap::SnapRadius(r) => param.push_str(&format!(";snapRadius={r}")),
    }
    if pass_through {
        param.push_str(";passThrough=true");
    }
    if let Some(s) = stop_duration {
        param.push_str(&format!("!stopDuration={s}"));
    }
    param
}

/// An assembled route request.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub url: String,
    /// The URL exceeds [`URL_LENGTH_WARN`].
    pub length_warning: bool,
}

/// Assemble the routing URL through `vias` in sequence order.
pub fn build_route_request(
    endpoint: &str,
    origin: LatLng,
    destination: LatLng,
    vias: &[OrderedVia],
    config: &RoutingConfig,
    api_key: &str,
) -> Result<RouteRequest> {
    if !origin.is_finite() || !destination.is_finite() {
        return Err(RoutePlannerError::validation(
            "origin and destination coordinates must be finite numbers",
        ));
    }
    if let Some(bad) = vias.iter().find(|v| !v.position().is_finite()) {
        return Err(RoutePlannerError::validation(format!(
            "via {} has invalid coordinates",
            bad.id
        )));
    }

    let snap = Snap::from_config(config);
    let mut sorted: Vec<&OrderedVia> = vias.iter().collect();
    sorted.sort_by_key(|v| v.sequence);

    let mut parts = vec![
        format!("transportMode={}", config.transport_mode),
        format!("return={}", config.return_fields),
        format!("spans={}", config.spans),
        format!("departureTime={}", config.departure_time),
        waypoint_param(WaypointKind::Origin, origin, snap, false, None),
    ];

    for (index, via) in sorted.iter().enumerate() {
        if let Some(shaping) = config.shaping_before(index) {
            parts.push(waypoint_param(WaypointKind::Via, shaping, snap, true, None));
        }
        let stop_duration = if via.service_s > 0 {
            via.service_s
        } else {
            config.stop_duration_fallback_s
        };
        parts.push(waypoint_param(
            WaypointKind::Via,
            via.position(),
            snap,
            false,
            Some(stop_duration),
        ));
    }
    for shaping in config.shaping.iter().filter(|s| s.before >= sorted.len()) {
        debug!(index = shaping.before, vias = sorted.len(), "ignoring shaping point past last via");
    }

    parts.push(waypoint_param(
        WaypointKind::Destination,
        destination,
        snap,
        false,
        None,
    ));

    let avoid_key = encode_component("avoid[features]");
    for feature in config.effective_avoid_features() {
        parts.push(format!("{avoid_key}={}", encode_component(&feature)));
    }
    for (key, value) in &config.vehicle_profile {
        parts.push(format!(
            "{}={}",
            encode_component(&format!("vehicle[{key}]")),
            encode_component(value)
        ));
    }
    parts.push(format!("apiKey={api_key}"));

    let url = format!("{endpoint}?{}", parts.join("&"));
    let length_warning = url.len() > URL_LENGTH_WARN;
    if length_warning {
        warn!(
            length = url.len(),
            limit = URL_LENGTH_WARN,
            "routing URL exceeds recommended length"
        );
    } else {
        debug!(length = url.len(), url = %scrub_url(&url), "routing URL assembled");
    }

    Ok(RouteRequest {
        url,
        length_warning,
    })
}

fn finite_or_zero(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Aggregate `routes[0].sections` into a [`RoutingArtifact`].
pub fn parse_route_response(
    raw: &Value,
    config: &RoutingConfig,
    origin: LatLng,
    destination: LatLng,
    via_count: usize,
) -> Result<RoutingArtifact> {
    let route = raw
        .get("routes")
        .and_then(Value::as_array)
        .and_then(|routes| routes.first())
        .ok_or_else(|| RoutePlannerError::protocol("no routes returned by the routing service"))?;

    let empty = Vec::new();
    let sections = match route.get("sections") {
        None | Some(Value::Null) => &empty,
        Some(Value::Array(sections)) => sections,
        Some(_) => {
            return Err(RoutePlannerError::protocol(
                "invalid sections in routing response",
            ));
        }
    };

    let mut totals = RouteTotals::default();
    let mut section_polylines = Vec::with_capacity(sections.len());
    let mut section_notices = Vec::new();

    for (section_index, section) in sections.iter().enumerate() {
        let summary = section.get("summary");
        totals.length_m += finite_or_zero(summary.and_then(|s| s.get("length")));
        totals.duration_s += finite_or_zero(summary.and_then(|s| s.get("duration")));

        if let Some(polyline) = section
            .get("polyline")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
        {
            section_polylines.push(polyline.to_string());
        }

        if let Some(notices) = section
            .get("notices")
            .and_then(Value::as_array)
            .filter(|n| !n.is_empty())
        {
            section_notices.push(SectionNotices {
                section_index,
                notices: notices.clone(),
            });
        }
    }

    Ok(RoutingArtifact {
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        transport_mode: config.transport_mode.clone(),
        departure_time: config.departure_time.clone(),
        return_fields: config.return_fields.clone(),
        spans: config.spans.clone(),
        avoid_features: config.effective_avoid_features(),
        vehicle_params: config.vehicle_profile.clone(),
        origin,
        destination,
        via_count,
        totals,
        section_polylines,
        section_notices,
        raw: raw.clone(),
    })
}
