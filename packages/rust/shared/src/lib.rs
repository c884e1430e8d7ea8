//! Shared types, error model, and configuration for wasteroute.
//!
//! This crate is the foundation depended on by all other wasteroute crates.
//! It provides:
//! - [`RoutePlannerError`], the unified error type
//! - Domain types ([`StopRow`], [`OrderedVia`], [`RoutingArtifact`], ...)
//! - Configuration ([`AppConfig`], config loading)
//! - The in-memory credential holder ([`ApiKeyVault`])

pub mod config;
pub mod credential;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_TIMEOUT_SECS, DefaultsConfig, HereConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_api_key,
};
pub use credential::{ApiKeyVault, DEFAULT_IDLE_TIMEOUT, scrub_url};
pub use error::{Result, RoutePlannerError};
pub use types::{
    DetectedSchema, IngestionConfig, LatLng, OrderedStopsArtifact, OrderedStopsMeta, OrderedVia,
    RouteTotals, RoutingArtifact, RoutingConfig, RoutingInputs, SectionNotices, ShapingPoint, StopRow,
    artifact_names,
};
