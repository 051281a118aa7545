//! Error types for expose-tunnel.
//!
//! [`ExposeError`] covers every way a tunnel attempt can go wrong. Only
//! [`ExposeError::Config`] and [`ExposeError::ExhaustedFallbacks`] are meant
//! to reach the caller; the others are produced per backend attempt and
//! drive the fallback decision.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ExposeError>;

#[derive(Error, Debug)]
pub enum ExposeError {
    /// A required parameter is missing or malformed for the chosen backend.
    #[error("configuration error: {0}")]
    Config(String),

    /// The relay reported a known failure phrase on stderr, or could not be spawned.
    #[error("backend '{backend}' failed: {reason}")]
    Backend { backend: String, reason: String },

    /// No success or failure signal arrived before the deadline.
    #[error("backend '{backend}' produced no URL within {waited:?}")]
    Timeout { backend: String, waited: Duration },

    /// Every configured backend failed or timed out.
    #[error("all tunnel backends failed: {}", .attempts.join("; "))]
    ExhaustedFallbacks { attempts: Vec<String> },

    /// The relay binary could not be downloaded or extracted.
    #[error("relay binary acquisition failed: {0}")]
    Acquisition(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExposeError {
    /// Short stable label (snake_case) for structured log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExposeError::Config(_) => "config_error",
            ExposeError::Backend { .. } => "backend_failure",
            ExposeError::Timeout { .. } => "timeout_pending",
            ExposeError::ExhaustedFallbacks { .. } => "exhausted_fallbacks",
            ExposeError::Acquisition(_) => "acquisition_failure",
            ExposeError::Io(_) => "io_error",
        }
    }

    /// Whether the orchestrator may move on to the next backend after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExposeError::Backend { .. }
                | ExposeError::Timeout { .. }
                | ExposeError::Acquisition(_)
                | ExposeError::Io(_)
        )
    }
}
