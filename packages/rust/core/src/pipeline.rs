//! Stage orchestration: CSV → ordered stops → route → GPX track.
//!
//! Every stage checks that its upstream artifacts exist (naming the stage to
//! run otherwise), does its work, then invalidates downstream artifacts and
//! writes its own. A failing stage leaves previously written artifacts as
//! they were.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use wasteroute_here::{
    HereClient, SequenceOptions, build_route_request, build_sequence_request,
    parse_route_response, parse_sequence_response,
};
use wasteroute_ingest::{IngestRequest, IngestResult, ingest, read_stops_csv, write_stops_csv};
use wasteroute_shared::{
    ApiKeyVault, HereConfig, IngestionConfig, OrderedStopsArtifact, OrderedStopsMeta, Result,
    RoutePlannerError, RoutingArtifact, RoutingConfig, RoutingInputs, artifact_names as names,
};
use wasteroute_storage::ArtifactStore;
use wasteroute_track::{
    GpxDocument, build_gpx, fmt_hms, fmt_km, fmt_lat_lng, fmt_min, generate_filename,
    merge_sections, track_description, track_name, track_title,
};

// ---------------------------------------------------------------------------
// Stages and progress
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingestion,
    Sequencing,
    Routing,
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Sequencing => "sequencing",
            Self::Routing => "routing",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called for non-fatal problems the user should see.
    fn warning(&self, message: &str);
    /// Called when a stage completes.
    fn done(&self, stage: Stage, summary: &[String]);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn warning(&self, _message: &str) {}
    fn done(&self, _stage: Stage, _summary: &[String]) {}
}

/// Network collaborators shared by the sequencing and routing stages.
#[derive(Debug, Clone, Copy)]
pub struct Services<'a> {
    pub client: &'a HereClient,
    pub vault: &'a ApiKeyVault,
    pub here: &'a HereConfig,
}

async fn require_json<S, T>(store: &S, name: &str, step: Stage) -> Result<T>
where
    S: ArtifactStore,
    T: serde::de::DeserializeOwned,
{
    store.read_json(name).await?.ok_or_else(|| {
        RoutePlannerError::precondition(format!("{name} not found"), step.as_str())
    })
}

async fn delete_all<S: ArtifactStore>(store: &S, artifacts: &[&str]) -> Result<()> {
    for name in artifacts {
        if store.delete(name).await? {
            debug!(artifact = name, "invalidated downstream artifact");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Stage 1: ingestion
// ---------------------------------------------------------------------------

/// Filter the input sheet and persist `stops_filtered.csv` and
/// `ingestion_config.json`.
#[instrument(skip_all, fields(source = %request.source_file))]
pub async fn run_ingestion<S: ArtifactStore>(
    store: &S,
    csv_text: &str,
    request: &IngestRequest,
    progress: &dyn ProgressReporter,
) -> Result<IngestResult> {
    progress.phase("Filtering stops");
    let result = ingest(csv_text, request)?;
    if result.stops.is_empty() {
        progress.warning("no rows matched the selected wastes and routes");
    }

    let stops_csv = write_stops_csv(&result.stops)?;

    progress.phase("Saving stops");
    delete_all(
        store,
        &[names::ORDERED_STOPS, names::ROUTING_RESPONSE, names::TRACK_GPX],
    )
    .await?;
    store.write_text(names::STOPS_FILTERED, &stops_csv).await?;
    store
        .write_json(names::INGESTION_CONFIG, &result.config)
        .await?;

    progress.done(Stage::Ingestion, &result.summary_lines);
    Ok(result)
}

// ---------------------------------------------------------------------------
// Stage 2: sequencing
// ---------------------------------------------------------------------------

/// Result of the sequencing stage.
#[derive(Debug, Clone)]
pub struct SequencingOutcome {
    pub artifact: OrderedStopsArtifact,
    /// Stops sent after sanitation.
    pub sent_stops: usize,
}

impl SequencingOutcome {
    pub fn summary_lines(&self) -> Vec<String> {
        let inputs = &self.artifact.routing_inputs;
        let mut lines = vec![
            format!(
                "Sequenced {} of {} stops (departure {})",
                inputs.vias.len(),
                self.sent_stops,
                self.artifact.meta.departure
            ),
            format!("Start: {}", fmt_lat_lng(inputs.origin)),
        ];
        if let (Some(first), Some(last)) = (inputs.vias.first(), inputs.vias.last()) {
            lines.push(format!("First stop: {} (seq {})", first.id, first.sequence));
            lines.push(format!("Last stop:  {} (seq {})", last.id, last.sequence));
        }
        lines.push(format!("End:   {}", fmt_lat_lng(inputs.destination)));
        lines
    }
}

/// Order the filtered stops via the sequencing service and persist
/// `ordered_stops.json`. Invalidates any routing result and exported track.
#[instrument(skip_all)]
pub async fn run_sequencing<S: ArtifactStore>(
    store: &S,
    services: Services<'_>,
    departure: Option<String>,
    progress: &dyn ProgressReporter,
) -> Result<SequencingOutcome> {
    progress.phase("Loading stops");
    let stops_text = store
        .read_text(names::STOPS_FILTERED)
        .await?
        .ok_or_else(|| {
            RoutePlannerError::precondition(
                format!("{} not found", names::STOPS_FILTERED),
                Stage::Ingestion.as_str(),
            )
        })?;
    let stops = read_stops_csv(&stops_text)?;
    let config: IngestionConfig =
        require_json(store, names::INGESTION_CONFIG, Stage::Ingestion).await?;

    let api_key = services.vault.require()?;
    let options = SequenceOptions {
        improve_for: services.here.improve_for.clone(),
        mode: services.here.mode.clone(),
        departure,
    };
    let request = build_sequence_request(
        &services.here.sequencing_url,
        config.cocheras,
        config.planta,
        &stops,
        &api_key,
        &options,
    )?;

    info!(stops = request.stops.len(), "requesting stop sequence");
    progress.phase("Requesting stop sequence");
    let raw = services.client.get_json(&request.url).await?;
    let vias = parse_sequence_response(&raw, &request.stops)?;

    let artifact = OrderedStopsArtifact {
        wps_raw: raw,
        routing_inputs: RoutingInputs {
            origin: config.cocheras,
            destination: config.planta,
            vias,
        },
        meta: OrderedStopsMeta {
            selected_wastes: config.selected_wastes,
            selected_routes: config.selected_routes,
            departure: request.departure,
            mode: request.mode,
            improve_for: request.improve_for,
        },
    };

    delete_all(store, &[names::ROUTING_RESPONSE, names::TRACK_GPX]).await?;
    store.write_json(names::ORDERED_STOPS, &artifact).await?;

    let outcome = SequencingOutcome {
        artifact,
        sent_stops: request.stops.len(),
    };
    info!(vias = outcome.artifact.routing_inputs.vias.len(), "sequencing complete");
    progress.done(Stage::Sequencing, &outcome.summary_lines());
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Stage 3: routing
// ---------------------------------------------------------------------------

/// Result of the routing stage.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    pub artifact: RoutingArtifact,
    /// The request URL exceeded the recommended length.
    pub length_warning: bool,
    pub url_length: usize,
}

impl RoutingOutcome {
    pub fn summary_lines(&self) -> Vec<String> {
        let a = &self.artifact;
        let mut lines = vec![
            format!(
                "Route computed: {} sections, {} vias",
                a.section_polylines.len(),
                a.via_count
            ),
            format!(
                "Distance: {} | Duration: {} ({})",
                fmt_km(a.totals.length_m),
                fmt_min(a.totals.duration_s),
                fmt_hms(a.totals.duration_s)
            ),
            format!("Avoiding: {}", a.avoid_features.join(", ")),
        ];
        for section in &a.section_notices {
            lines.push(format!(
                "Section {}: {} notice(s)",
                section.section_index,
                section.notices.len()
            ));
        }
        lines
    }
}

/// Request the route through the ordered vias and persist
/// `routing_response.json`. Invalidates any exported track.
#[instrument(skip_all, fields(transport = %routing.transport_mode))]
pub async fn run_routing<S: ArtifactStore>(
    store: &S,
    services: Services<'_>,
    routing: &RoutingConfig,
    progress: &dyn ProgressReporter,
) -> Result<RoutingOutcome> {
    progress.phase("Loading ordered stops");
    let ordered: OrderedStopsArtifact =
        require_json(store, names::ORDERED_STOPS, Stage::Sequencing).await?;
    let inputs = &ordered.routing_inputs;

    let api_key = services.vault.require()?;
    let request = build_route_request(
        &services.here.routing_url,
        inputs.origin,
        inputs.destination,
        &inputs.vias,
        routing,
        &api_key,
    )?;
    if request.length_warning {
        progress.warning(&format!(
            "routing URL is {} characters long; the service may reject it",
            request.url.len()
        ));
    }

    info!(vias = inputs.vias.len(), "requesting route");
    progress.phase("Requesting route");
    let raw = services.client.get_json(&request.url).await?;
    let artifact = parse_route_response(
        &raw,
        routing,
        inputs.origin,
        inputs.destination,
        inputs.vias.len(),
    )?;

    delete_all(store, &[names::TRACK_GPX]).await?;
    store.write_json(names::ROUTING_RESPONSE, &artifact).await?;

    info!(
        length_m = artifact.totals.length_m,
        duration_s = artifact.totals.duration_s,
        sections = artifact.section_polylines.len(),
        "routing complete"
    );
    let outcome = RoutingOutcome {
        artifact,
        length_warning: request.length_warning,
        url_length: request.url.len(),
    };
    progress.done(Stage::Routing, &outcome.summary_lines());
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Stage 4: export
// ---------------------------------------------------------------------------

/// Result of the export stage.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    /// Suggested file name for the track.
    pub filename: String,
    pub gpx: String,
    pub point_count: usize,
    pub skipped_sections: Vec<usize>,
}

impl ExportOutcome {
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Track: {}", self.filename),
            format!("Points: {}", self.point_count),
        ];
        if !self.skipped_sections.is_empty() {
            lines.push(format!("Skipped sections: {:?}", self.skipped_sections));
        }
        lines
    }
}

/// Merge the routed sections into one track and persist `route.gpx`.
#[instrument(skip_all, fields(decimate_every = decimate_every))]
pub async fn run_export<S: ArtifactStore>(
    store: &S,
    decimate_every: usize,
    now: DateTime<Utc>,
    progress: &dyn ProgressReporter,
) -> Result<ExportOutcome> {
    progress.phase("Loading route");
    let routing: RoutingArtifact =
        require_json(store, names::ROUTING_RESPONSE, Stage::Routing).await?;
    let ordered: OrderedStopsArtifact =
        require_json(store, names::ORDERED_STOPS, Stage::Sequencing).await?;

    // Naming prefers the ingestion record, then the sequencing metadata
    let (wastes, routes) = match store
        .read_json::<IngestionConfig>(names::INGESTION_CONFIG)
        .await
    {
        Ok(Some(config)) => (config.selected_wastes, config.selected_routes),
        Ok(None) => (
            ordered.meta.selected_wastes.clone(),
            ordered.meta.selected_routes.clone(),
        ),
        Err(e) => {
            warn!(error = %e, "ingestion config unreadable, naming from sequencing metadata");
            (
                ordered.meta.selected_wastes.clone(),
                ordered.meta.selected_routes.clone(),
            )
        }
    };

    progress.phase("Merging sections");
    let merged = merge_sections(&routing.section_polylines, decimate_every);
    for index in &merged.skipped_sections {
        progress.warning(&format!("section {index} could not be decoded and was skipped"));
    }

    let inputs = &ordered.routing_inputs;
    let title = track_title(&wastes, &routes);
    let name = track_name(&title, now);
    let description = track_description(&routing.totals, inputs.vias.len());
    let gpx = build_gpx(&GpxDocument {
        origin: Some(inputs.origin),
        destination: Some(inputs.destination),
        points: &merged.points,
        name: &name,
        description: &description,
    });

    store.write_text(names::TRACK_GPX, &gpx).await?;
    info!(points = merged.points.len(), "track exported");

    let outcome = ExportOutcome {
        filename: generate_filename(&wastes, &routes),
        gpx,
        point_count: merged.points.len(),
        skipped_sections: merged.skipped_sections,
    };
    progress.done(Stage::Export, &outcome.summary_lines());
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use wasteroute_ingest::ServiceTimeRule;
    use wasteroute_shared::LatLng;
    use wasteroute_storage::MemoryStore;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHEET: &str = "lat,lng,Papel,Vidrio,,,,,Lunes,Martes\n\
                         40.0,-3.0,1,,,,,,x,\n\
                         40.1,-3.1,si,2,,,,,,x\n\
                         40.2,-3.2,,,,,,,x,x\n";

    fn sheet_request() -> IngestRequest {
        IngestRequest {
            selected_wastes: vec!["Papel".into(), "Vidrio".into()],
            selected_routes: vec!["Lunes".into(), "Martes".into()],
            cocheras: LatLng::new(40.5, -3.5),
            planta: LatLng::new(40.6, -3.6),
            service_time: ServiceTimeRule::default(),
            source_file: "puntos.csv".into(),
        }
    }

    fn here_config(server: &MockServer) -> HereConfig {
        HereConfig {
            sequencing_url: format!("{}/v8/findsequence2", server.uri()),
            routing_url: format!("{}/v8/routes", server.uri()),
            ..Default::default()
        }
    }

    fn vault() -> ApiKeyVault {
        let vault = ApiKeyVault::default();
        vault.set("test-key");
        vault
    }

    async fn mount_services(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/v8/findsequence2"))
            .and(query_param("apiKey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{
                    "waypoints": [
                        {"id": "Cocheras", "sequence": 0},
                        {"id": "stop1", "sequence": 1},
                        {"id": "stop2", "sequence": 0},
                        {"id": "Planta", "sequence": 3},
                    ]
                }]
            })))
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/v8/routes"))
            .and(query_param("transportMode", "truck"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "routes": [{
                    "sections": [
                        {"summary": {"length": 1000, "duration": 60},
                         "polyline": "BFgwk0H_9pSoGvM"},
                        {"summary": {"length": 2000, "duration": 90},
                         "polyline": "BFo2k0HvqqSwMoG"},
                    ]
                }]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn end_to_end_pipeline() {
        let server = MockServer::start().await;
        mount_services(&server).await;
        let store = MemoryStore::new();
        let client = HereClient::new(5).unwrap();
        let vault = vault();
        let here = here_config(&server);
        let services = Services {
            client: &client,
            vault: &vault,
            here: &here,
        };

        // Row 3 has no containers in the selected wastes
        let ingested = run_ingestion(&store, SHEET, &sheet_request(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(ingested.stops.len(), 2);
        assert_eq!(ingested.stops[1].containers, 3);
        assert_eq!(ingested.stops[1].service_s, 85);
        assert!(store.exists(names::STOPS_FILTERED).await.unwrap());
        assert!(store.exists(names::INGESTION_CONFIG).await.unwrap());

        let sequenced = run_sequencing(
            &store,
            services,
            Some("2024-05-01T06:00:00Z".into()),
            &SilentProgress,
        )
        .await
        .unwrap();
        let ids: Vec<&str> = sequenced
            .artifact
            .routing_inputs
            .vias
            .iter()
            .map(|v| v.id.as_str())
            .collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(sequenced.artifact.meta.improve_for, "time");

        let routed = run_routing(&store, services, &RoutingConfig::default(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(routed.artifact.totals.length_m, 3000.0);
        assert_eq!(routed.artifact.totals.duration_s, 150.0);
        assert_eq!(routed.artifact.via_count, 2);
        assert!(!routed.length_warning);

        let now = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
        let exported = run_export(&store, 1, now, &SilentProgress).await.unwrap();
        assert_eq!(exported.point_count, 3);
        assert_eq!(exported.filename, "Papel, Vidrio Ruta Lunes, Martes.gpx");
        assert!(exported.gpx.contains("Distance: 3.0 km | Duration: 2.5 min | Vias: 2"));
        assert!(exported.gpx.contains("(2024-05-01 06:00Z)"));
        assert_eq!(
            store.read_text(names::TRACK_GPX).await.unwrap().as_deref(),
            Some(exported.gpx.as_str())
        );
    }

    #[tokio::test]
    async fn resequencing_invalidates_route_and_track() {
        let server = MockServer::start().await;
        mount_services(&server).await;
        let store = MemoryStore::new();
        let client = HereClient::new(5).unwrap();
        let vault = vault();
        let here = here_config(&server);
        let services = Services {
            client: &client,
            vault: &vault,
            here: &here,
        };

        run_ingestion(&store, SHEET, &sheet_request(), &SilentProgress)
            .await
            .unwrap();
        run_sequencing(&store, services, None, &SilentProgress)
            .await
            .unwrap();
        run_routing(&store, services, &RoutingConfig::default(), &SilentProgress)
            .await
            .unwrap();
        run_export(&store, 1, Utc::now(), &SilentProgress)
            .await
            .unwrap();
        assert!(store.exists(names::ROUTING_RESPONSE).await.unwrap());
        assert!(store.exists(names::TRACK_GPX).await.unwrap());

        run_sequencing(&store, services, None, &SilentProgress)
            .await
            .unwrap();
        assert!(store.exists(names::ORDERED_STOPS).await.unwrap());
        assert!(!store.exists(names::ROUTING_RESPONSE).await.unwrap());
        assert!(!store.exists(names::TRACK_GPX).await.unwrap());

        run_ingestion(&store, SHEET, &sheet_request(), &SilentProgress)
            .await
            .unwrap();
        assert!(!store.exists(names::ORDERED_STOPS).await.unwrap());
    }

    #[tokio::test]
    async fn missing_artifacts_name_the_stage() {
        let store = MemoryStore::new();
        let client = HereClient::new(5).unwrap();
        let vault = vault();
        let here = HereConfig::default();
        let services = Services {
            client: &client,
            vault: &vault,
            here: &here,
        };

        let err = run_sequencing(&store, services, None, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Missing required data. Run ingestion first.");

        let err = run_routing(&store, services, &RoutingConfig::default(), &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Missing required data. Run sequencing first.");

        let err = run_export(&store, 1, Utc::now(), &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Missing required data. Run routing first.");
    }

    #[tokio::test]
    async fn missing_key_fails_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let client = HereClient::new(5).unwrap();
        let vault = ApiKeyVault::default();
        let here = here_config(&server);
        let services = Services {
            client: &client,
            vault: &vault,
            here: &here,
        };

        run_ingestion(&store, SHEET, &sheet_request(), &SilentProgress)
            .await
            .unwrap();
        let err = run_sequencing(&store, services, None, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, RoutePlannerError::Credential(_)));
        assert!(!store.exists(names::ORDERED_STOPS).await.unwrap());
    }

    #[tokio::test]
    async fn failed_call_keeps_prior_artifacts() {
        let server = MockServer::start().await;
        mount_services(&server).await;
        let store = MemoryStore::new();
        let client = HereClient::new(5).unwrap();
        let vault = vault();
        let here = here_config(&server);
        let services = Services {
            client: &client,
            vault: &vault,
            here: &here,
        };

        run_ingestion(&store, SHEET, &sheet_request(), &SilentProgress)
            .await
            .unwrap();
        run_sequencing(&store, services, None, &SilentProgress)
            .await
            .unwrap();
        run_routing(&store, services, &RoutingConfig::default(), &SilentProgress)
            .await
            .unwrap();

        let failing = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&failing)
            .await;
        let failing_here = here_config(&failing);
        let failing_services = Services {
            here: &failing_here,
            ..services
        };

        let err = run_sequencing(&store, failing_services, None, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, RoutePlannerError::Http { status: 503, .. }));
        assert!(store.exists(names::ORDERED_STOPS).await.unwrap());
        assert!(store.exists(names::ROUTING_RESPONSE).await.unwrap());
    }

    #[tokio::test]
    async fn export_names_from_sequencing_meta_without_ingestion_record() {
        let server = MockServer::start().await;
        mount_services(&server).await;
        let store = MemoryStore::new();
        let client = HereClient::new(5).unwrap();
        let vault = vault();
        let here = here_config(&server);
        let services = Services {
            client: &client,
            vault: &vault,
            here: &here,
        };

        run_ingestion(&store, SHEET, &sheet_request(), &SilentProgress)
            .await
            .unwrap();
        run_sequencing(&store, services, None, &SilentProgress)
            .await
            .unwrap();
        run_routing(&store, services, &RoutingConfig::default(), &SilentProgress)
            .await
            .unwrap();
        store.delete(names::INGESTION_CONFIG).await.unwrap();

        let exported = run_export(&store, 1, Utc::now(), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(exported.filename, "Papel, Vidrio Ruta Lunes, Martes.gpx");
    }
}
