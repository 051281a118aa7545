//! Tunnel backend trait and shared types.
//!
//! Defines the `RelayBackend` async trait implemented by every relay
//! adapter (bore.pub, self-hosted bore, localhost.run), the
//! `OutputClassifier` trait that turns raw relay output into a verdict,
//! and the `TunnelOutcome` a supervision attempt resolves to.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ExposeError, Result};

/// Terminal result of one supervision attempt.
///
/// Starts as `Pending` and moves exactly once to `Ready` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelOutcome {
    Pending,
    Ready { url: String },
    Failed { reason: String },
}

impl TunnelOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, TunnelOutcome::Pending)
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            TunnelOutcome::Ready { url } => Some(url),
            _ => None,
        }
    }
}

/// Executable plus argument vector used to launch a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl RelayCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for RelayCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Decides whether a chunk of relay output carries a URL or a failure.
///
/// Implementations are stateless: a chunk is whatever a single read from
/// the pipe returned, so it may hold a partial line or several lines.
pub trait OutputClassifier: Send + Sync {
    /// Public URL contained in a stdout chunk, if any.
    fn match_success(&self, chunk: &str) -> Option<String>;

    /// Whether a stderr chunk holds a known failure signature.
    ///
    /// Backends without a failure vocabulary keep the default and can only
    /// fail by timing out.
    fn match_failure(&self, _chunk: &str) -> bool {
        false
    }
}

/// Trait implemented by all relay backends.
///
/// A backend knows how to stage its executable, which command line exposes
/// a local port, and how to read that command's output. The lifecycle is:
/// `prepare()` -> `command()` -> supervise with `classifier()`.
#[async_trait]
pub trait RelayBackend: Send + Sync {
    /// Backend identifier used in logs and error reports.
    fn name(&self) -> &str;

    /// Make sure the relay executable is available.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Command line that exposes `local_port` through this relay.
    fn command(&self, local_port: u16) -> RelayCommand;

    /// Classifier matching this relay's output grammar.
    fn classifier(&self) -> Arc<dyn OutputClassifier>;
}

/// Identifier of a supported relay backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Public bore broker at `bore.pub`.
    Bore,
    /// Bore server at a caller-supplied endpoint.
    SelfHostedBore,
    /// SSH remote forwarding through `localhost.run`.
    LocalhostRun,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Bore => "bore",
            BackendKind::SelfHostedBore => "bore-self-hosted",
            BackendKind::LocalhostRun => "localhost.run",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ExposeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bore" | "bore.pub" => Ok(BackendKind::Bore),
            "bore-self-hosted" | "self-hosted" | "selfhosted" => Ok(BackendKind::SelfHostedBore),
            "localhost.run" | "localhost-run" | "ssh" => Ok(BackendKind::LocalhostRun),
            other => Err(ExposeError::Config(format!(
                "Unknown tunnel service '{}'. Supported: bore, bore-self-hosted, localhost.run",
                other
            ))),
        }
    }
}

impl Serialize for BackendKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BackendKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
