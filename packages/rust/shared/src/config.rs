//! Application configuration for wasteroute.
//!
//! User config lives at `~/.wasteroute/wasteroute.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RoutePlannerError, Result};
use crate::types::{LatLng, RoutingConfig};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "wasteroute.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".wasteroute";

/// Hard cap for a single service call.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// Config structs (matching wasteroute.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Sequencing/routing service settings.
    #[serde(default)]
    pub here: HereConfig,

    /// Routing request policy.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Default depot (start) coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depot: Option<LatLng>,

    /// Default treatment plant (end) coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant: Option<LatLng>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Service time for the first container, in seconds.
    #[serde(default = "default_base_stop_time")]
    pub base_stop_time: u32,

    /// Service time for each additional container, in seconds.
    #[serde(default = "default_time_per_additional_container")]
    pub time_per_additional_container: u32,

    /// Keep every Nth track point on export (1 keeps all).
    #[serde(default = "default_decimate_every")]
    pub decimate_every: usize,

    /// Artifact database location.
    #[serde(default = "default_store_path")]
    pub store_path: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            base_stop_time: default_base_stop_time(),
            time_per_additional_container: default_time_per_additional_container(),
            decimate_every: default_decimate_every(),
            store_path: default_store_path(),
        }
    }
}

fn default_base_stop_time() -> u32 {
    45
}
fn default_time_per_additional_container() -> u32 {
    20
}
fn default_decimate_every() -> usize {
    1
}
fn default_store_path() -> String {
    "var/wasteroute.db".into()
}

/// `[here]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HereConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sequencing endpoint.
    #[serde(default = "default_sequencing_url")]
    pub sequencing_url: String,

    /// Routing endpoint.
    #[serde(default = "default_routing_url")]
    pub routing_url: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Sequencing optimization objective.
    #[serde(default = "default_improve_for")]
    pub improve_for: String,

    /// Sequencing transport mode string.
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl Default for HereConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            sequencing_url: default_sequencing_url(),
            routing_url: default_routing_url(),
            timeout_secs: default_timeout_secs(),
            improve_for: default_improve_for(),
            mode: default_mode(),
        }
    }
}

fn default_api_key_env() -> String {
    "HERE_API_KEY".into()
}
fn default_sequencing_url() -> String {
    "https://wps.hereapi.com/v8/findsequence2".into()
}
fn default_routing_url() -> String {
    "https://router.hereapi.com/v8/routes".into()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_improve_for() -> String {
    "time".into()
}
fn default_mode() -> String {
    "fastest;truck;traffic:disabled".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.wasteroute/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RoutePlannerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.wasteroute/wasteroute.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RoutePlannerError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        RoutePlannerError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RoutePlannerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RoutePlannerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RoutePlannerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API key from the configured env var, failing if unset or blank.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.here.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(RoutePlannerError::Credential(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}
