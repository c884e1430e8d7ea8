//! Error types for wasteroute.
//!
//! Library crates use [`RoutePlannerError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics and prints
//! [`RoutePlannerError::user_message`] for stage failures.

use std::path::PathBuf;

/// Top-level error type for all wasteroute operations.
#[derive(Debug, thiserror::Error)]
pub enum RoutePlannerError {
    /// Input validation failed (bad coordinates, empty file, missing columns).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A required upstream artifact is missing.
    #[error("missing prerequisite: {message}")]
    Precondition {
        message: String,
        /// The pipeline step that produces the missing artifact.
        step: String,
    },

    /// The request or response violated the service contract.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The call exceeded its time budget and was aborted.
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection-level failure (DNS, TLS, reset, unreadable body).
    #[error("network error: {0}")]
    Network(String),

    /// Missing, blank, or expired API credential.
    #[error("credential error: {0}")]
    Credential(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Artifact store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Artifact content could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RoutePlannerError>;

impl RoutePlannerError {
    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a precondition error naming the step that must run first.
    pub fn precondition(msg: impl Into<String>, step: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
            step: step.into(),
        }
    }

    /// Create a protocol error from any displayable message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short category label, stable for logs and JSON output.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Precondition { .. } => "precondition",
            Self::Protocol { .. } => "protocol",
            Self::Http { .. } | Self::Timeout { .. } | Self::Network(_) => "transport",
            Self::Credential(_) => "credential",
            Self::Config { .. } => "config",
            Self::Storage(_) | Self::Io { .. } => "storage",
            Self::Parse { .. } => "parse",
        }
    }

    /// A user-facing explanation that distinguishes the failure categories.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message } => format!("Input rejected: {message}"),
            Self::Precondition { step, .. } => {
                format!("Missing required data. Run {step} first.")
            }
            Self::Protocol { message } => {
                format!("The service response could not be used: {message}")
            }
            Self::Http { status, body } => {
                format!("The service rejected the request (HTTP {status}): {body}")
            }
            Self::Timeout { secs } => {
                format!("Network timeout: no answer from the service within {secs}s.")
            }
            Self::Network(msg) => format!("Network failure: {msg}"),
            Self::Credential(_) => {
                "No API key available. Set the API key environment variable and retry.".into()
            }
            other => other.to_string(),
        }
    }
}
