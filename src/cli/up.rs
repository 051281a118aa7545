//! `up` command handler.

use std::future::Future;
use std::io;

use anyhow::{Context, Result};
use tracing::{info, warn};

use expose_tunnel::config::{parse_backend_list, parse_flag, TunnelConfig};
use expose_tunnel::output::{OutputSink, TUNNEL_URL_OUTPUT};
use expose_tunnel::signals::wait_for_shutdown_signal;
use expose_tunnel::tunnel::{self, BackendKind};

use super::UpArgs;

impl UpArgs {
    pub(crate) fn into_config(self) -> Result<TunnelConfig> {
        let service = self
            .service
            .parse::<BackendKind>()
            .with_context(|| format!("Invalid service '{}'", self.service))?;
        let fallback = parse_backend_list(&self.fallback).with_context(|| "Invalid fallback list")?;
        let blocking = parse_flag(&self.blocking).with_context(|| "Invalid blocking flag")?;

        Ok(TunnelConfig {
            service,
            port: self.port,
            self_hosted_endpoint: self.self_hosted_endpoint,
            secret: self.secret,
            fallback,
            blocking,
            resources_dir: self.readiness.resources_dir.clone(),
            bore_version: self.bore_version,
            readiness: self.readiness.to_config(),
        })
    }
}

/// Establish the tunnel, publish its URL and keep it alive if blocking.
pub(crate) async fn cmd_up(args: UpArgs) -> Result<()> {
    let config = args.into_config()?;
    let sink = OutputSink::from_env();

    tokio::select! {
        result = run(&config, &sink) => result,
        name = shutdown_signal(wait_for_shutdown_signal()) => {
            info!("Process was terminated with {}", name);
            Ok(())
        }
    }
}

/// Resolve with the signal name, or never if the handlers could not be
/// installed.
async fn shutdown_signal<F>(signal: F) -> &'static str
where
    F: Future<Output = io::Result<&'static str>>,
{
    match signal.await {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "Failed to install signal handlers, running without them");
            std::future::pending().await
        }
    }
}

async fn run(config: &TunnelConfig, sink: &OutputSink) -> Result<()> {
    let established = tunnel::tunnel(config)
        .await
        .with_context(|| "Failed to establish tunnel")?;

    sink.publish(TUNNEL_URL_OUTPUT, &established.url)
        .with_context(|| "Failed to publish tunnel url")?;
    info!(backend = %established.backend, url = %established.url, "Tunnel is live");

    let mut session = established.session;
    if config.blocking {
        session.wait().await;
        warn!(backend = %established.backend, "Tunnel process ended");
    } else {
        session.detach();
    }
    Ok(())
}
