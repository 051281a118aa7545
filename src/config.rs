//! Tunnel configuration.
//!
//! [`TunnelConfig`] carries the pipeline inputs (service, port, self-hosted
//! endpoint, secret, fallback list, blocking) plus the knobs for binary
//! staging and readiness polling. The CLI fills it from flags or the
//! `INPUT_*` environment variables a pipeline runner exports.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::acquire::{BinaryStore, DEFAULT_BORE_VERSION, DEFAULT_RESOURCES_DIR};
use crate::error::{ExposeError, Result};
use crate::tunnel::types::BackendKind;

/// Readiness polling configuration.
///
/// The defaults give a 20 second budget per backend attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub poll_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            max_attempts: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Primary backend, tried first.
    pub service: BackendKind,
    /// Local port to expose.
    pub port: u16,
    /// Server address for the self-hosted bore backend.
    pub self_hosted_endpoint: Option<String>,
    /// Optional bore `--secret` for the self-hosted backend.
    pub secret: Option<String>,
    /// Backends tried in order after the primary fails.
    pub fallback: Vec<BackendKind>,
    /// Keep supervising the relay after the URL is published.
    pub blocking: bool,
    /// Where relay binaries and marker files live.
    pub resources_dir: PathBuf,
    pub bore_version: String,
    pub readiness: ReadinessConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            service: BackendKind::Bore,
            port: 3000,
            self_hosted_endpoint: None,
            secret: None,
            fallback: Vec::new(),
            blocking: true,
            resources_dir: PathBuf::from(DEFAULT_RESOURCES_DIR),
            bore_version: DEFAULT_BORE_VERSION.to_string(),
            readiness: ReadinessConfig::default(),
        }
    }
}

impl TunnelConfig {
    /// Backends in trial order: the primary service, then the fallbacks.
    pub fn trial_order(&self) -> Vec<BackendKind> {
        std::iter::once(self.service)
            .chain(self.fallback.iter().copied())
            .collect()
    }

    pub fn binary_store(&self) -> BinaryStore {
        BinaryStore::new(&self.resources_dir, &self.bore_version)
    }

    /// Self-hosted endpoint, if set and not blank.
    pub fn endpoint(&self) -> Option<&str> {
        self.self_hosted_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Secret, if set and not blank.
    pub fn secret(&self) -> Option<&str> {
        self.secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ExposeError::Config("port must be between 1 and 65535".into()));
        }
        if self.readiness.poll_interval_ms == 0 {
            return Err(ExposeError::Config(
                "readiness poll interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a fallback list given either as a JSON array or as a comma/newline
/// separated string. Blank input yields an empty list.
pub fn parse_backend_list(raw: &str) -> Result<Vec<BackendKind>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| ExposeError::Config(format!("invalid fallback list '{}': {}", trimmed, e)));
    }
    trimmed
        .split(|c: char| c == ',' || c == '\n')
        .map(|item| item.trim().trim_start_matches("- ").trim_matches('"'))
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<BackendKind>())
        .collect()
}

/// Parse a pipeline boolean input (`true`/`false`, `yes`/`no`, `1`/`0`).
pub fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        other => Err(ExposeError::Config(format!(
            "invalid boolean '{}'",
            other
        ))),
    }
}
