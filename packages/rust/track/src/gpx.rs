//! GPX 1.1 writer and track naming.

use chrono::{DateTime, Utc};

use wasteroute_shared::{LatLng, RouteTotals};

const CREATOR: &str = "wasteroute";
const GPX_NAMESPACE: &str = "http://www.topografix.com/GPX/1/1";

/// Inputs for one GPX document.
#[derive(Debug, Clone)]
pub struct GpxDocument<'a> {
    /// Depot, emitted as a start waypoint.
    pub origin: Option<LatLng>,
    /// Plant, emitted as an end waypoint.
    pub destination: Option<LatLng>,
    pub points: &'a [LatLng],
    pub name: &'a str,
    pub description: &'a str,
}

/// Escape the five XML special characters.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Serialize a single-track, single-segment GPX document.
pub fn build_gpx(doc: &GpxDocument<'_>) -> String {
    let name = escape_xml(doc.name);
    let desc = escape_xml(doc.description);
    let mut xml = String::with_capacity(256 + doc.points.len() * 64);

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<gpx version=\"1.1\" creator=\"{CREATOR}\" xmlns=\"{GPX_NAMESPACE}\">\n"
    ));
    xml.push_str("  <metadata>\n");
    xml.push_str(&format!("    <name>{name}</name>\n"));
    xml.push_str(&format!("    <desc>{desc}</desc>\n"));
    xml.push_str("  </metadata>\n");

    let waypoints = [
        (doc.origin, "Cocheras (start)"),
        (doc.destination, "Planta (end)"),
    ];
    for (point, label) in waypoints {
        if let Some(p) = point.filter(LatLng::is_finite) {
            xml.push_str(&format!("  <wpt lat=\"{}\" lon=\"{}\">\n", p.lat, p.lng));
            xml.push_str(&format!("    <name>{label}</name>\n"));
            xml.push_str("  </wpt>\n");
        }
    }

    xml.push_str("  <trk>\n");
    xml.push_str(&format!("    <name>{name}</name>\n"));
    xml.push_str(&format!("    <desc>{desc}</desc>\n"));
    xml.push_str("    <trkseg>\n");
    for p in doc.points {
        xml.push_str(&format!(
            "      <trkpt lat=\"{}\" lon=\"{}\"></trkpt>\n",
            p.lat, p.lng
        ));
    }
    xml.push_str("    </trkseg>\n");
    xml.push_str("  </trk>\n");
    xml.push_str("</gpx>");
    xml
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

fn title_char_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | ',' | '.' | '-') || "áéíóúÁÉÍÓÚüÜñÑ".contains(c)
}

/// Replace characters outside the title alphabet with `_` and trim.
pub fn sanitize_title(base: &str) -> String {
    base.chars()
        .map(|c| if title_char_allowed(c) { c } else { '_' })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Capitalize each route name and join with `", "`.
pub fn title_routes(routes: &[String]) -> String {
    routes
        .iter()
        .map(|r| {
            let mut chars = r.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `{wastes or "Ruta"} Ruta {Routes}`, sanitized.
pub fn track_title(wastes: &[String], routes: &[String]) -> String {
    let waste_part = if wastes.is_empty() {
        "Ruta".to_string()
    } else {
        wastes.join(", ")
    };
    let route_part = title_routes(routes);
    let base = if route_part.is_empty() {
        format!("{waste_part} Ruta")
    } else {
        format!("{waste_part} Ruta {route_part}")
    };
    sanitize_title(&base)
}

/// File name for the exported track.
pub fn generate_filename(wastes: &[String], routes: &[String]) -> String {
    format!("{}.gpx", track_title(wastes, routes))
}

/// `{title} (YYYY-MM-DD HH:MMZ)`.
pub fn track_name(title: &str, at: DateTime<Utc>) -> String {
    format!("{title} ({})", at.format("%Y-%m-%d %H:%MZ"))
}

/// `Distance: {km} km | Duration: {min} min | Vias: {n}`.
pub fn track_description(totals: &RouteTotals, via_count: usize) -> String {
    format!(
        "Distance: {:.1} km | Duration: {:.1} min | Vias: {via_count}",
        totals.length_m / 1000.0,
        totals.duration_s / 60.0
    )
}
