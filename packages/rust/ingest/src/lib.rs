//! Stop ingestion: CSV parsing, column detection, filtering and service-time
//! computation.
//!
//! Turns a loosely typed collection-point sheet into validated [`StopRow`]s
//! and an [`IngestionConfig`] describing how they were selected.

mod schema;
mod stops_csv;

use tracing::{debug, info, instrument};

use wasteroute_shared::{
    DetectedSchema, IngestionConfig, LatLng, Result, RoutePlannerError, StopRow,
};

pub use schema::{detect_schema, header_is_blank};
pub use stops_csv::{read_stops_csv, write_stops_csv};

/// Number of stops returned as preview.
pub const PREVIEW_ROWS: usize = 10;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Service-time formula parameters (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimeRule {
    /// Time for the first container.
    pub base_stop_time: u32,
    /// Time for each container after the first.
    pub time_per_additional_container: u32,
}

impl Default for ServiceTimeRule {
    fn default() -> Self {
        Self {
            base_stop_time: 45,
            time_per_additional_container: 20,
        }
    }
}

impl ServiceTimeRule {
    /// `base + per_additional * max(0, containers - 1)`.
    pub fn service_seconds(&self, containers: u32) -> u32 {
        self.base_stop_time.saturating_add(
            self.time_per_additional_container
                .saturating_mul(containers.saturating_sub(1)),
        )
    }

    /// Human-readable description of the formula.
    pub fn describe(&self) -> String {
        format!(
            "{}s first container +{}s each additional container",
            self.base_stop_time, self.time_per_additional_container
        )
    }
}

/// Selection and context for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub selected_wastes: Vec<String>,
    pub selected_routes: Vec<String>,
    /// Depot (start) coordinates.
    pub cocheras: LatLng,
    /// Treatment plant (end) coordinates.
    pub planta: LatLng,
    pub service_time: ServiceTimeRule,
    /// Name of the input file, recorded for provenance.
    pub source_file: String,
}

/// Output of [`ingest`].
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub stops: Vec<StopRow>,
    pub config: IngestionConfig,
    /// First [`PREVIEW_ROWS`] stops.
    pub preview: Vec<StopRow>,
    pub summary_lines: Vec<String>,
}

// ---------------------------------------------------------------------------
// Cell parsing
// ---------------------------------------------------------------------------

/// Interpret a container-count cell. Never fails.
///
/// Blank and negative words count 0, affirmative words count 1, numbers
/// (decimal comma accepted) are truncated, any other text counts 1.
pub fn parse_container_count(cell: &str) -> u32 {
    let s = cell.trim();
    if s.is_empty() {
        return 0;
    }
    let low = s.to_lowercase();
    match low.as_str() {
        "no" | "n" | "none" | "0" => return 0,
        "yes" | "si" | "sí" | "s" | "y" | "1" => return 1,
        _ => {}
    }
    match s.replacen(',', ".", 1).parse::<f64>() {
        Ok(n) if n.is_finite() => n.trunc().max(0.0) as u32,
        _ => 1,
    }
}

fn parse_coordinate(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn non_blank(cell: Option<&str>) -> Option<String> {
    cell.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ---------------------------------------------------------------------------
// Table reading
// ---------------------------------------------------------------------------

struct Table {
    headers: Vec<String>,
    rows: Vec<csv::StringRecord>,
}

fn read_table(csv_text: &str) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(csv_text.trim_start_matches('\u{feff}').as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| RoutePlannerError::validation(format!("could not read header row: {e}")))?
        .iter()
        .map(String::from)
        .collect();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| {
            RoutePlannerError::validation(format!("malformed CSV at data row {}: {e}", i + 1))
        })?;
        // Rows made only of empty cells are skipped
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(record);
    }

    Ok(Table { headers, rows })
}

/// Read only the header row and report the detected schema.
pub fn detect_columns(csv_text: &str) -> Result<DetectedSchema> {
    let table = read_table(csv_text)?;
    checked_schema(&table.headers)
}

fn checked_schema(headers: &[String]) -> Result<DetectedSchema> {
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(RoutePlannerError::validation("could not detect headers"));
    }
    let schema = detect_schema(headers);
    if schema.waste_cols.is_empty() || schema.route_cols.is_empty() {
        return Err(RoutePlannerError::validation(format!(
            "no waste-type or route columns detected; found headers: [{}]",
            headers.join(", ")
        )));
    }
    Ok(schema)
}

fn resolve_selection(
    headers: &[String],
    selected: &[String],
    candidates: &[String],
    kind: &str,
    waste: bool,
) -> Result<Vec<usize>> {
    if selected.is_empty() {
        return Err(RoutePlannerError::validation(format!(
            "select at least one {kind} column"
        )));
    }
    selected
        .iter()
        .map(|name| {
            schema::slot_index(headers, name, waste)
                .filter(|_| candidates.contains(name))
                .ok_or_else(|| {
                    RoutePlannerError::validation(format!(
                        "unknown {kind} column '{name}'; detected: [{}]",
                        candidates.join(", ")
                    ))
                })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Filter the sheet into stops for the selected wastes and routes.
///
/// A row is kept when its coordinates are finite, at least one selected
/// route cell is non-blank, and the selected waste cells add up to at least
/// one container.
#[instrument(skip_all, fields(source = %request.source_file))]
pub fn ingest(csv_text: &str, request: &IngestRequest) -> Result<IngestResult> {
    let table = read_table(csv_text)?;
    if table.rows.is_empty() {
        return Err(RoutePlannerError::validation("CSV appears empty"));
    }
    if !request.cocheras.is_finite() || !request.planta.is_finite() {
        return Err(RoutePlannerError::validation(
            "depot and plant coordinates must be finite numbers",
        ));
    }

    let headers = &table.headers;
    let schema = checked_schema(headers)?;
    let waste_idx = resolve_selection(
        headers,
        &request.selected_wastes,
        &schema.waste_cols,
        "waste",
        true,
    )?;
    let route_idx = resolve_selection(
        headers,
        &request.selected_routes,
        &schema.route_cols,
        "route",
        false,
    )?;

    let col_pueblo = schema::find_optional_column(headers, "pueblo");
    let col_municipio = schema::find_optional_column(headers, "municipio");
    let col_fid = schema::find_optional_column(headers, "fid");
    debug!(?col_pueblo, ?col_municipio, ?col_fid, "optional columns");

    let w_route = request.selected_routes.join(",");
    let w_wastes = request.selected_wastes.join(",");

    let mut stops = Vec::new();
    for record in &table.rows {
        let (Some(lat), Some(lng)) = (
            parse_coordinate(record.get(0).unwrap_or("")),
            parse_coordinate(record.get(1).unwrap_or("")),
        ) else {
            continue;
        };

        let on_route = route_idx
            .iter()
            .any(|&i| non_blank(record.get(i)).is_some());
        if !on_route {
            continue;
        }

        let containers = waste_idx
            .iter()
            .map(|&i| parse_container_count(record.get(i).unwrap_or("")))
            .fold(0u32, u32::saturating_add);
        if containers == 0 {
            continue;
        }

        let optional = |col: Option<usize>| col.and_then(|i| non_blank(record.get(i)));
        let fid = optional(col_fid);
        let id = fid.clone().unwrap_or_else(|| (stops.len() + 1).to_string());

        stops.push(StopRow {
            id,
            lat,
            lng,
            service_s: request.service_time.service_seconds(containers),
            containers,
            w_route: w_route.clone(),
            w_wastes: w_wastes.clone(),
            pueblo: optional(col_pueblo),
            municipio: optional(col_municipio),
            fid,
        });
    }

    info!(
        rows_total = table.rows.len(),
        rows_selected = stops.len(),
        "ingestion complete"
    );

    let config = IngestionConfig {
        selected_wastes: request.selected_wastes.clone(),
        selected_routes: request.selected_routes.clone(),
        base_stop_time: request.service_time.base_stop_time,
        time_per_additional_container: request.service_time.time_per_additional_container,
        counts_rule: request.service_time.describe(),
        cocheras: request.cocheras,
        planta: request.planta,
        source_file: request.source_file.clone(),
        rows_total: table.rows.len(),
        rows_selected: stops.len(),
        schema: Some(schema),
    };

    let summary_lines = vec![
        "Ingestion complete.".to_string(),
        format!("Total rows:     {}", config.rows_total),
        format!(
            "Selected rows:  {}  (wastes: [{}], routes: [{}])",
            config.rows_selected,
            config.selected_wastes.join(", "),
            config.selected_routes.join(", ")
        ),
        format!("Service time:   {}", config.counts_rule),
    ];

    let preview = stops.iter().take(PREVIEW_ROWS).cloned().collect();

    Ok(IngestResult {
        stops,
        config,
        preview,
        summary_lines,
    })
}
