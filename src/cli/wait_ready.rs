//! `wait-ready` command handler.
//!
//! Polls the marker files written by an `up` running in another process,
//! for pipelines that start the tunnel in the background.

use anyhow::{Context, Result};
use tracing::info;

use expose_tunnel::output::{OutputSink, TUNNEL_URL_OUTPUT};
use expose_tunnel::tunnel::{MarkerFiles, ReadinessGate, TunnelOutcome};

use super::WaitReadyArgs;

pub(crate) async fn cmd_wait_ready(args: WaitReadyArgs) -> Result<()> {
    let markers = MarkerFiles::in_dir(&args.readiness.resources_dir);
    let gate = ReadinessGate::from(&args.readiness.to_config());

    info!(
        dir = %args.readiness.resources_dir.display(),
        "Waiting for tunnel url to be set"
    );
    match gate.await_outcome(&markers).await {
        TunnelOutcome::Ready { url } => {
            OutputSink::from_env()
                .publish(TUNNEL_URL_OUTPUT, &url)
                .with_context(|| "Failed to publish tunnel url")?;
            Ok(())
        }
        TunnelOutcome::Failed { reason } => anyhow::bail!("Tunnel failed: {}", reason),
        TunnelOutcome::Pending => anyhow::bail!(
            "Timed out waiting for tunnel url ({:?})",
            gate.deadline()
        ),
    }
}
