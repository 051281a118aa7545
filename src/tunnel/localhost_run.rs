//! localhost.run tunnel backend.
//!
//! Uses plain `ssh` remote port forwarding to `nokey@localhost.run`; no
//! binary needs to be downloaded. The service prints the assigned
//! `https://*.lhr.life` address in the session banner on stdout.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ExposeError, Result};
use crate::tunnel::classifier::SshClassifier;
use crate::tunnel::types::{BackendKind, OutputClassifier, RelayBackend, RelayCommand};
use crate::tunnel::which;

const LOCALHOST_RUN_HOST: &str = "nokey@localhost.run";

/// SSH relay through localhost.run.
#[derive(Debug, Clone)]
pub struct LocalhostRunTunnel {
    ssh: PathBuf,
}

impl LocalhostRunTunnel {
    pub fn new() -> Self {
        Self {
            ssh: PathBuf::from("ssh"),
        }
    }
}

impl Default for LocalhostRunTunnel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayBackend for LocalhostRunTunnel {
    fn name(&self) -> &str {
        BackendKind::LocalhostRun.as_str()
    }

    async fn prepare(&self) -> Result<()> {
        if which(&self.ssh.to_string_lossy()) {
            Ok(())
        } else {
            Err(ExposeError::Acquisition(
                "ssh not found on PATH (required for localhost.run)".into(),
            ))
        }
    }

    fn command(&self, local_port: u16) -> RelayCommand {
        RelayCommand::new(
            self.ssh.clone(),
            [
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-R".to_string(),
                format!("80:localhost:{}", local_port),
                LOCALHOST_RUN_HOST.to_string(),
            ],
        )
    }

    fn classifier(&self) -> Arc<dyn OutputClassifier> {
        Arc::new(SshClassifier)
    }
}
