//! Command-line interface.
//!
//! Every `up` input can also come from the `INPUT_*` environment variables
//! a GitHub Actions runner exports for action inputs.

pub(crate) mod up;
pub(crate) mod wait_ready;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use expose_tunnel::acquire::{DEFAULT_BORE_VERSION, DEFAULT_RESOURCES_DIR};
use expose_tunnel::config::ReadinessConfig;

#[derive(Parser, Debug)]
#[command(
    name = "expose-tunnel",
    version,
    about = "Expose a local port through bore or localhost.run and publish the URL"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Start a tunnel, falling back through the configured services, and publish its URL
    Up(UpArgs),
    /// Wait for a tunnel started by another process to publish its URL
    WaitReady(WaitReadyArgs),
}

#[derive(Args, Debug)]
pub(crate) struct UpArgs {
    /// Primary tunnel service (bore, bore-self-hosted, localhost.run)
    #[arg(long, env = "INPUT_SERVICE", default_value = "bore")]
    pub service: String,

    /// Local port to expose
    #[arg(long, env = "INPUT_PORT")]
    pub port: u16,

    /// Server address for bore-self-hosted
    #[arg(long, env = "INPUT_SELFHOSTEDENDPOINT")]
    pub self_hosted_endpoint: Option<String>,

    /// Secret for bore-self-hosted
    #[arg(long, env = "INPUT_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Fallback services, as a JSON array or comma separated
    #[arg(long, env = "INPUT_FALLBACK", default_value = "")]
    pub fallback: String,

    /// Keep running until the tunnel process exits (false detaches it)
    #[arg(long, env = "INPUT_BLOCKING", default_value = "true")]
    pub blocking: String,

    /// bore release to download
    #[arg(long, default_value = DEFAULT_BORE_VERSION)]
    pub bore_version: String,

    #[command(flatten)]
    pub readiness: ReadinessArgs,
}

#[derive(Args, Debug)]
pub(crate) struct WaitReadyArgs {
    #[command(flatten)]
    pub readiness: ReadinessArgs,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct ReadinessArgs {
    /// Directory for relay binaries and readiness marker files
    #[arg(long, env = "EXPOSE_TUNNEL_DIR", default_value = DEFAULT_RESOURCES_DIR)]
    pub resources_dir: PathBuf,

    /// Milliseconds between readiness polls
    #[arg(long, default_value_t = 200)]
    pub poll_interval_ms: u64,

    /// Readiness polls per service before giving up on it
    #[arg(long, default_value_t = 100)]
    pub max_attempts: u32,
}

impl ReadinessArgs {
    pub fn to_config(&self) -> ReadinessConfig {
        ReadinessConfig {
            poll_interval_ms: self.poll_interval_ms,
            max_attempts: self.max_attempts,
        }
    }
}
