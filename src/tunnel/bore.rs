//! bore tunnel backends.
//!
//! Runs `bore local <port> --to <server>` either against the public broker
//! at `bore.pub` or against a self-hosted bore server. bore logs
//! `listening at <server>:<port>` on stdout once the tunnel is up and prints
//! connection errors on stderr.

use std::sync::Arc;

use async_trait::async_trait;

use crate::acquire::BinaryStore;
use crate::error::{ExposeError, Result};
use crate::tunnel::classifier::BoreClassifier;
use crate::tunnel::types::{BackendKind, OutputClassifier, RelayBackend, RelayCommand};

/// Address of the public bore broker.
pub const PUBLIC_BORE_ENDPOINT: &str = "bore.pub";

/// bore backend, public or self-hosted.
#[derive(Debug, Clone)]
pub struct BoreTunnel {
    kind: BackendKind,
    endpoint: String,
    secret: Option<String>,
    store: Arc<BinaryStore>,
}

impl BoreTunnel {
    /// Tunnel through `bore.pub`. The public broker takes no secret.
    pub fn public(store: Arc<BinaryStore>) -> Self {
        Self {
            kind: BackendKind::Bore,
            endpoint: PUBLIC_BORE_ENDPOINT.to_string(),
            secret: None,
            store,
        }
    }

    /// Tunnel through a self-hosted bore server.
    ///
    /// Fails with a configuration error when `endpoint` is blank, before
    /// anything is downloaded or spawned.
    pub fn self_hosted(
        store: Arc<BinaryStore>,
        endpoint: Option<&str>,
        secret: Option<&str>,
    ) -> Result<Self> {
        let endpoint = endpoint.map(str::trim).unwrap_or_default();
        if endpoint.is_empty() {
            return Err(ExposeError::Config(
                "selfHostedEndpoint is required for the bore-self-hosted service".into(),
            ));
        }
        Ok(Self {
            kind: BackendKind::SelfHostedBore,
            endpoint: endpoint.to_string(),
            secret: secret
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            store,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RelayBackend for BoreTunnel {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn prepare(&self) -> Result<()> {
        self.store.ensure_bore().await.map(|_| ())
    }

    fn command(&self, local_port: u16) -> RelayCommand {
        let mut args = vec![
            "local".to_string(),
            local_port.to_string(),
            "--to".to_string(),
            self.endpoint.clone(),
        ];
        if let Some(ref secret) = self.secret {
            args.push("--secret".to_string());
            args.push(secret.clone());
        }
        RelayCommand::new(self.store.bore_path(), args)
    }

    fn classifier(&self) -> Arc<dyn OutputClassifier> {
        Arc::new(BoreClassifier::new(self.endpoint.clone()))
    }
}
