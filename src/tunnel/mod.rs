//! Tunnel module for exposing a local port via a public relay.
//!
//! Supports three backends:
//! - **bore** (`bore local --to bore.pub`) using the public broker
//! - **bore-self-hosted**: bore against your own server, optionally with `--secret`
//! - **localhost.run**: SSH remote forwarding, no binary download needed
//!
//! Each attempt launches the relay, scrapes its output for a URL or a
//! failure phrase and waits on a bounded readiness gate. Backends are tried
//! in order until one comes up.
//!
//! # Usage
//!
//! ```rust,no_run
//! use expose_tunnel::config::TunnelConfig;
//! use expose_tunnel::tunnel;
//!
//! # async fn example() -> expose_tunnel::error::Result<()> {
//! let config = TunnelConfig {
//!     port: 8080,
//!     ..Default::default()
//! };
//! let established = tunnel::tunnel(&config).await?;
//! println!("Public URL: {}", established.url);
//! established.session.terminate().await;
//! # Ok(())
//! # }
//! ```

pub mod bore;
pub mod classifier;
pub mod gate;
pub mod localhost_run;
pub mod orchestrator;
pub mod supervisor;
pub mod types;

pub use bore::BoreTunnel;
pub use gate::{MarkerFiles, OutcomeSlot, ReadinessGate};
pub use localhost_run::LocalhostRunTunnel;
pub use orchestrator::{EstablishedTunnel, FallbackOrchestrator};
pub use supervisor::{RelayOutput, SupervisionSession};
pub use types::{BackendKind, OutputClassifier, RelayBackend, RelayCommand, TunnelOutcome};

use std::sync::Arc;

use tracing::{info, warn};

use crate::acquire::{ensure_dir, BinaryStore};
use crate::config::TunnelConfig;
use crate::error::{ExposeError, Result};

/// Create the backend for `kind` from the configuration.
pub fn create_backend(
    kind: BackendKind,
    config: &TunnelConfig,
    store: &Arc<BinaryStore>,
) -> Result<Box<dyn RelayBackend>> {
    match kind {
        BackendKind::Bore => Ok(Box::new(BoreTunnel::public(Arc::clone(store)))),
        BackendKind::SelfHostedBore => Ok(Box::new(BoreTunnel::self_hosted(
            Arc::clone(store),
            config.endpoint(),
            config.secret(),
        )?)),
        BackendKind::LocalhostRun => Ok(Box::new(LocalhostRunTunnel::new())),
    }
}

/// Build every backend in trial order.
///
/// All backends are constructed up front so a configuration error surfaces
/// before any relay is downloaded or spawned.
pub fn build_backends(config: &TunnelConfig) -> Result<Vec<Box<dyn RelayBackend>>> {
    let store = Arc::new(config.binary_store());
    config
        .trial_order()
        .into_iter()
        .map(|kind| create_backend(kind, config, &store))
        .collect()
}

/// Establish a tunnel for `config.port`, falling back through
/// `config.fallback` after the primary service.
///
/// Marker files are reset first and always end up holding the outcome, so
/// a `wait-ready` in another process sees configuration errors as failures.
/// Relay output is logged under `config.resources_dir`.
pub async fn tunnel(config: &TunnelConfig) -> Result<EstablishedTunnel> {
    ensure_dir(&config.resources_dir)?;
    let markers = MarkerFiles::in_dir(&config.resources_dir);
    markers.clear()?;

    let backends = match config.validate().and_then(|()| build_backends(config)) {
        Ok(backends) => backends,
        Err(e) => {
            publish_failure(&markers, &e);
            return Err(e);
        }
    };

    info!(
        service = %config.service,
        port = config.port,
        fallbacks = config.fallback.len(),
        "Exposing local port"
    );

    FallbackOrchestrator::new(ReadinessGate::from(&config.readiness))
        .with_markers(markers)
        .with_relay_logs(&config.resources_dir)
        .establish(backends, config.port)
        .await
}

fn publish_failure(markers: &MarkerFiles, error: &ExposeError) {
    let outcome = TunnelOutcome::Failed {
        reason: error.to_string(),
    };
    if let Err(e) = markers.publish(&outcome) {
        warn!(error = %e, "Failed to publish tunnel failure marker");
    }
}

/// Check if a binary is available on `PATH` using `which` / `where`.
pub(crate) fn which(binary: &str) -> bool {
    std::process::Command::new(if cfg!(windows) { "where" } else { "which" })
        .arg(binary)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
