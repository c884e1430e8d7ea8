//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Report, Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use wasteroute_core::pipeline::{
    ProgressReporter, Services, Stage, run_export, run_ingestion, run_routing, run_sequencing,
};
use wasteroute_here::HereClient;
use wasteroute_ingest::{IngestRequest, ServiceTimeRule, detect_columns};
use wasteroute_shared::{
    ApiKeyVault, AppConfig, LatLng, RoutePlannerError, RoutingConfig, artifact_names,
    init_config, load_config, validate_api_key,
};
use wasteroute_storage::{ArtifactStore, MemoryStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// wasteroute: plan waste-collection routes from a stops sheet to a GPX track.
#[derive(Parser)]
#[command(
    name = "wasteroute",
    version,
    about = "Filter collection points, sequence them, route the truck and export a GPX track.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Artifact database path (overrides `defaults.store_path`).
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Show the waste-type and route columns detected in a sheet.
    Columns {
        /// Input CSV file.
        csv: PathBuf,
    },

    /// Filter a sheet into stops for the selected wastes and routes.
    Ingest(IngestArgs),

    /// Order the filtered stops with the sequencing service.
    Sequence(SequenceArgs),

    /// Compute the truck route through the ordered stops.
    Route(RouteArgs),

    /// Export the computed route as a GPX track.
    Export(ExportArgs),

    /// Run ingestion, sequencing, routing and export in one go.
    Run {
        #[command(flatten)]
        ingest: IngestArgs,

        #[command(flatten)]
        sequence: SequenceArgs,

        #[command(flatten)]
        route: RouteArgs,

        #[command(flatten)]
        export: ExportArgs,

        /// Keep intermediate artifacts in memory instead of the database.
        #[arg(long)]
        ephemeral: bool,
    },

    /// Inspect stored artifacts.
    Artifacts {
        #[command(subcommand)]
        action: ArtifactsAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Ingestion flags.
#[derive(Args, Clone)]
pub(crate) struct IngestArgs {
    /// Input CSV file.
    pub csv: PathBuf,

    /// Waste-type column to include (repeatable or comma-separated).
    #[arg(long = "waste", value_delimiter = ',', required = true)]
    pub wastes: Vec<String>,

    /// Route column to include (repeatable or comma-separated).
    #[arg(long = "route", value_delimiter = ',', required = true)]
    pub routes: Vec<String>,

    /// Depot coordinates as `lat,lng` (defaults to `[depot]` in config).
    #[arg(long)]
    pub depot: Option<LatLng>,

    /// Plant coordinates as `lat,lng` (defaults to `[plant]` in config).
    #[arg(long)]
    pub plant: Option<LatLng>,

    /// Seconds for the first container.
    #[arg(long)]
    pub base_stop_time: Option<u32>,

    /// Seconds for each additional container.
    #[arg(long)]
    pub per_container: Option<u32>,
}

/// Sequencing flags.
#[derive(Args, Clone, Default)]
pub(crate) struct SequenceArgs {
    /// Departure time (ISO-8601, UTC); defaults to now.
    #[arg(long)]
    pub departure: Option<String>,
}

/// Routing flags.
#[derive(Args, Clone, Default)]
pub(crate) struct RouteArgs {
    /// Forbid U-turns.
    #[arg(long)]
    pub no_uturns: bool,

    /// Avoid difficult turns.
    #[arg(long)]
    pub avoid_difficult_turns: bool,

    /// Send `radius` instead of `snapRadius`.
    #[arg(long)]
    pub use_radius: bool,

    /// Snap/radius value in meters.
    #[arg(long)]
    pub snap: Option<u32>,

    /// Extra feature to avoid (repeatable).
    #[arg(long = "avoid")]
    pub avoid: Vec<String>,

    /// Vehicle parameter as `key=value` (repeatable).
    #[arg(long = "vehicle", value_parser = parse_key_value)]
    pub vehicle: Vec<(String, String)>,

    /// Pass-through shaping point before via N, as `N=lat,lng` (repeatable).
    #[arg(long = "shaping", value_parser = parse_shaping)]
    pub shaping: Vec<(usize, LatLng)>,
}

/// Export flags.
#[derive(Args, Clone, Default)]
pub(crate) struct ExportArgs {
    /// Keep every Nth track point (1 keeps all).
    #[arg(long)]
    pub decimate: Option<usize>,

    /// Directory to write the GPX file to (defaults to the current directory).
    #[arg(long)]
    pub out_dir: Option<PathBuf>,
}

/// Artifact subcommands.
#[derive(Subcommand)]
pub(crate) enum ArtifactsAction {
    /// List stored artifacts.
    List,
    /// Print one artifact.
    Show {
        /// Artifact name, e.g. `ordered_stops.json`.
        name: String,
    },
    /// Delete all stored artifacts.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected 'key=value', got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.trim().to_string(), value.trim().to_string()))
}

fn parse_shaping(s: &str) -> std::result::Result<(usize, LatLng), String> {
    let (index, point) = parse_key_value(s)?;
    let index = index
        .parse::<usize>()
        .map_err(|_| format!("invalid via index '{index}'"))?;
    Ok((index, point.parse::<LatLng>()?))
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "wasteroute=info",
        1 => "wasteroute=debug",
        _ => "wasteroute=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let store_path = cli
        .store
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.defaults.store_path));

    match cli.command {
        Command::Columns { csv } => cmd_columns(&csv),
        Command::Ingest(args) => {
            let store = Storage::open(&store_path).await?;
            cmd_ingest(&store, &config, &args).await
        }
        Command::Sequence(args) => {
            let store = Storage::open(&store_path).await?;
            let env = Env::new(&config)?;
            cmd_sequence(&store, &env, &args).await
        }
        Command::Route(args) => {
            let store = Storage::open(&store_path).await?;
            let env = Env::new(&config)?;
            cmd_route(&store, &env, &args).await
        }
        Command::Export(args) => {
            let store = Storage::open(&store_path).await?;
            cmd_export(&store, &config, &args).await
        }
        Command::Run {
            ingest,
            sequence,
            route,
            export,
            ephemeral,
        } => {
            let env = Env::new(&config)?;
            if ephemeral {
                let store = MemoryStore::new();
                cmd_run(&store, &env, &ingest, &sequence, &route, &export).await
            } else {
                let store = Storage::open(&store_path).await?;
                cmd_run(&store, &env, &ingest, &sequence, &route, &export).await
            }
        }
        Command::Artifacts { action } => {
            let store = Storage::open(&store_path).await?;
            match action {
                ArtifactsAction::List => cmd_artifacts_list(&store).await,
                ArtifactsAction::Show { name } => cmd_artifacts_show(&store, &name).await,
                ArtifactsAction::Clear => cmd_artifacts_clear(&store).await,
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

/// Wrap a pipeline failure so the user-facing explanation leads the report.
fn stage_failure(e: RoutePlannerError) -> Report {
    let message = e.user_message();
    Report::new(e).wrap_err(message)
}

/// Resolved configuration plus the network collaborators.
struct Env<'a> {
    config: &'a AppConfig,
    client: HereClient,
    vault: ApiKeyVault,
}

impl<'a> Env<'a> {
    fn new(config: &'a AppConfig) -> Result<Self> {
        let vault = ApiKeyVault::default();
        // A missing key surfaces as a credential error when a stage needs it
        if let Ok(key) = validate_api_key(config) {
            vault.set(&key);
        }
        Ok(Self {
            config,
            client: HereClient::new(config.here.timeout_secs)?,
            vault,
        })
    }

    fn services(&self) -> Services<'_> {
        Services {
            client: &self.client,
            vault: &self.vault,
            here: &self.config.here,
        }
    }
}

fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| eyre!("cannot read '{}': {e}", path.display()))
}

fn ingest_request(config: &AppConfig, args: &IngestArgs) -> Result<IngestRequest> {
    let cocheras = args
        .depot
        .or(config.depot)
        .ok_or_else(|| eyre!("depot coordinates missing: pass --depot or set [depot] in config"))?;
    let planta = args
        .plant
        .or(config.plant)
        .ok_or_else(|| eyre!("plant coordinates missing: pass --plant or set [plant] in config"))?;

    Ok(IngestRequest {
        selected_wastes: args.wastes.clone(),
        selected_routes: args.routes.clone(),
        cocheras,
        planta,
        service_time: ServiceTimeRule {
            base_stop_time: args
                .base_stop_time
                .unwrap_or(config.defaults.base_stop_time),
            time_per_additional_container: args
                .per_container
                .unwrap_or(config.defaults.time_per_additional_container),
        },
        source_file: args
            .csv
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
    })
}

fn routing_config(config: &AppConfig, args: &RouteArgs) -> RoutingConfig {
    let mut routing = config.routing.clone();
    if args.no_uturns {
        routing.allow_uturns = false;
    }
    if args.avoid_difficult_turns {
        routing.avoid_difficult_turns = true;
    }
    if args.use_radius {
        routing.use_radius_instead_of_snap = true;
    }
    if let Some(snap) = args.snap {
        routing.snap_or_radius_value = snap;
    }
    routing.avoid_features.extend(args.avoid.iter().cloned());
    routing.vehicle_profile.extend(args.vehicle.iter().cloned());
    for &(before, point) in &args.shaping {
        routing.set_shaping(before, point);
    }
    routing
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_columns(csv: &Path) -> Result<()> {
    let text = read_input(csv)?;
    let schema = detect_columns(&text).map_err(stage_failure)?;
    println!("  Latitude:  {}", schema.lat_col);
    println!("  Longitude: {}", schema.lng_col);
    println!("  Wastes:    {}", schema.waste_cols.join(", "));
    println!("  Routes:    {}", schema.route_cols.join(", "));
    Ok(())
}

async fn cmd_ingest<S: ArtifactStore>(store: &S, config: &AppConfig, args: &IngestArgs) -> Result<()> {
    let request = ingest_request(config, args)?;
    let text = read_input(&args.csv)?;
    info!(source = %request.source_file, "ingesting stops");

    let reporter = CliProgress::new();
    let result = run_ingestion(store, &text, &request, &reporter)
        .await
        .map_err(stage_failure)?;
    reporter.finish();

    if !result.preview.is_empty() {
        println!("  Preview:");
        for stop in &result.preview {
            println!(
                "    {:>8}  {:.6},{:.6}  containers={}  service={}s",
                stop.id, stop.lat, stop.lng, stop.containers, stop.service_s
            );
        }
    }
    Ok(())
}

async fn cmd_sequence<S: ArtifactStore>(store: &S, env: &Env<'_>, args: &SequenceArgs) -> Result<()> {
    let reporter = CliProgress::new();
    run_sequencing(store, env.services(), args.departure.clone(), &reporter)
        .await
        .map_err(stage_failure)?;
    reporter.finish();
    Ok(())
}

async fn cmd_route<S: ArtifactStore>(store: &S, env: &Env<'_>, args: &RouteArgs) -> Result<()> {
    let routing = routing_config(env.config, args);
    let reporter = CliProgress::new();
    run_routing(store, env.services(), &routing, &reporter)
        .await
        .map_err(stage_failure)?;
    reporter.finish();
    Ok(())
}

async fn cmd_export<S: ArtifactStore>(store: &S, config: &AppConfig, args: &ExportArgs) -> Result<()> {
    let decimate = args.decimate.unwrap_or(config.defaults.decimate_every);
    let reporter = CliProgress::new();
    let outcome = run_export(store, decimate, Utc::now(), &reporter)
        .await
        .map_err(stage_failure)?;
    reporter.finish();

    let dir = match &args.out_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("cannot create '{}': {e}", dir.display()))?;
    let path = dir.join(&outcome.filename);
    std::fs::write(&path, &outcome.gpx)
        .map_err(|e| eyre!("cannot write '{}': {e}", path.display()))?;

    println!("  Saved: {}", path.display());
    Ok(())
}

async fn cmd_run<S: ArtifactStore>(
    store: &S,
    env: &Env<'_>,
    ingest: &IngestArgs,
    sequence: &SequenceArgs,
    route: &RouteArgs,
    export: &ExportArgs,
) -> Result<()> {
    cmd_ingest(store, env.config, ingest).await?;
    cmd_sequence(store, env, sequence).await?;
    cmd_route(store, env, route).await?;
    cmd_export(store, env.config, export).await
}

async fn cmd_artifacts_list<S: ArtifactStore>(store: &S) -> Result<()> {
    let artifacts = store.list().await?;
    if artifacts.is_empty() {
        println!("  No artifacts stored.");
        return Ok(());
    }
    for a in artifacts {
        println!(
            "  {:<24} {:>10} bytes  {}  {}",
            a.name,
            a.size_bytes,
            &a.sha256[..a.sha256.len().min(12)],
            a.updated_at
        );
    }
    Ok(())
}

async fn cmd_artifacts_show<S: ArtifactStore>(store: &S, name: &str) -> Result<()> {
    match store.read_text(name).await? {
        Some(text) => {
            println!("{text}");
            Ok(())
        }
        None => Err(eyre!(
            "artifact '{name}' not found (known: {}, {}, {}, {}, {})",
            artifact_names::STOPS_FILTERED,
            artifact_names::INGESTION_CONFIG,
            artifact_names::ORDERED_STOPS,
            artifact_names::ROUTING_RESPONSE,
            artifact_names::TRACK_GPX
        )),
    }
}

async fn cmd_artifacts_clear<S: ArtifactStore>(store: &S) -> Result<()> {
    let mut removed = 0;
    for a in store.list().await? {
        if store.delete(&a.name).await? {
            removed += 1;
        }
    }
    println!("  Removed {removed} artifact(s).");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn warning(&self, message: &str) {
        self.spinner.println(format!("  warning: {message}"));
    }

    fn done(&self, stage: Stage, summary: &[String]) {
        self.spinner.println(String::new());
        self.spinner.println(format!("  [{stage}]"));
        for line in summary {
            self.spinner.println(format!("  {line}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "wasteroute",
            "run",
            "puntos.csv",
            "--waste",
            "Papel,Vidrio",
            "--route",
            "Lunes",
            "--depot",
            "40.5,-3.5",
            "--plant",
            "40.6,-3.6",
            "--shaping",
            "1=40.1,-3.1",
            "--vehicle",
            "grossWeight=18000",
            "--no-uturns",
            "--ephemeral",
        ])
        .expect("parse");

        let Command::Run {
            ingest,
            route,
            ephemeral,
            ..
        } = cli.command
        else {
            panic!("expected run command");
        };
        assert_eq!(ingest.wastes, vec!["Papel", "Vidrio"]);
        assert_eq!(ingest.depot, Some(LatLng::new(40.5, -3.5)));
        assert!(ephemeral);

        let routing = routing_config(&AppConfig::default(), &route);
        assert!(!routing.allow_uturns);
        assert_eq!(routing.shaping_before(1), Some(LatLng::new(40.1, -3.1)));
        assert_eq!(
            routing.vehicle_profile.get("grossWeight").map(String::as_str),
            Some("18000")
        );
    }

    #[test]
    fn shaping_flag_rejects_bad_values() {
        assert!(parse_shaping("x=40,-3").is_err());
        assert!(parse_shaping("1=40").is_err());
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn ingest_request_falls_back_to_config_coordinates() {
        let mut config = AppConfig::default();
        config.depot = Some(LatLng::new(1.0, 2.0));
        config.plant = Some(LatLng::new(3.0, 4.0));
        let args = IngestArgs {
            csv: PathBuf::from("data/puntos.csv"),
            wastes: vec!["Papel".into()],
            routes: vec!["Lunes".into()],
            depot: None,
            plant: None,
            base_stop_time: Some(30),
            per_container: None,
        };
        let req = ingest_request(&config, &args).expect("request");
        assert_eq!(req.cocheras, LatLng::new(1.0, 2.0));
        assert_eq!(req.source_file, "puntos.csv");
        assert_eq!(req.service_time.base_stop_time, 30);
        assert_eq!(req.service_time.time_per_additional_container, 20);

        let err = ingest_request(&AppConfig::default(), &args).unwrap_err();
        assert!(err.to_string().contains("depot"));
    }
}
