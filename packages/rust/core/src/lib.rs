//! Core pipeline orchestration for wasteroute.
//!
//! Ties ingestion, sequencing, routing and track export together. Each stage
//! reads its inputs from the artifact store and persists its output there,
//! so stages can be re-run independently once their inputs exist.

pub mod pipeline;

pub use pipeline::{
    ExportOutcome, ProgressReporter, RoutingOutcome, SequencingOutcome, Services, SilentProgress,
    Stage, run_export, run_ingestion, run_routing, run_sequencing,
};
