//! Fallback orchestration across relay backends.
//!
//! Backends are tried strictly in the order given. Each attempt gets its
//! own readiness budget; a failure or timeout moves on to the next backend
//! and the first `Ready` outcome ends the search.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ExposeError, Result};
use crate::tunnel::gate::{MarkerFiles, ReadinessGate};
use crate::tunnel::supervisor::{self, RelayOutput, SupervisionSession};
use crate::tunnel::types::{RelayBackend, TunnelOutcome};

/// A live tunnel: the winning backend, its public URL and the relay session.
#[derive(Debug)]
pub struct EstablishedTunnel {
    pub backend: String,
    pub url: String,
    pub session: SupervisionSession,
}

#[derive(Debug, Clone)]
pub struct FallbackOrchestrator {
    gate: ReadinessGate,
    markers: Option<MarkerFiles>,
    output: RelayOutput,
}

impl FallbackOrchestrator {
    pub fn new(gate: ReadinessGate) -> Self {
        Self {
            gate,
            markers: None,
            output: RelayOutput::Piped,
        }
    }

    /// Send relay output to log files in `dir` so a detached relay survives
    /// this process.
    pub fn with_relay_logs(mut self, dir: &Path) -> Self {
        self.output = RelayOutput::LogFiles(dir.to_path_buf());
        self
    }

    /// Also publish the final outcome to marker files for other processes.
    pub fn with_markers(mut self, markers: MarkerFiles) -> Self {
        self.markers = Some(markers);
        self
    }

    /// Try `backends` in order until one produces a URL.
    pub async fn establish(
        &self,
        backends: Vec<Box<dyn RelayBackend>>,
        local_port: u16,
    ) -> Result<EstablishedTunnel> {
        if let Some(ref markers) = self.markers {
            markers.clear()?;
        }

        let mut attempts = Vec::with_capacity(backends.len());
        for backend in backends {
            let name = backend.name().to_string();
            match self.attempt(backend.as_ref(), local_port).await {
                Ok(tunnel) => {
                    if let Some(ref markers) = self.markers {
                        markers.publish(&TunnelOutcome::Ready {
                            url: tunnel.url.clone(),
                        })?;
                    }
                    return Ok(tunnel);
                }
                Err(e) if e.is_recoverable() => {
                    warn!(
                        backend = %name,
                        kind = e.as_label(),
                        error = %e,
                        "Tunnel backend did not come up, trying next"
                    );
                    attempts.push(match &e {
                        ExposeError::Backend { .. } | ExposeError::Timeout { .. } => e.to_string(),
                        _ => format!("{}: {}", name, e),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(ref markers) = self.markers {
            markers.publish(&TunnelOutcome::Failed {
                reason: "all tunnel backends failed".into(),
            })?;
        }
        Err(ExposeError::ExhaustedFallbacks { attempts })
    }

    async fn attempt(
        &self,
        backend: &dyn RelayBackend,
        local_port: u16,
    ) -> Result<EstablishedTunnel> {
        let name = backend.name();
        backend.prepare().await?;

        let command = backend.command(local_port);
        let session = supervisor::launch_with(name, &command, backend.classifier(), &self.output)?;

        info!(backend = name, "Waiting for tunnel url to be set");
        match session.await_outcome(&self.gate).await {
            TunnelOutcome::Ready { url } => {
                info!(
                    backend = name,
                    url = %url,
                    elapsed_ms = session.elapsed().as_millis() as u64,
                    "Tunnel is ready"
                );
                Ok(EstablishedTunnel {
                    backend: name.to_string(),
                    url,
                    session,
                })
            }
            TunnelOutcome::Failed { reason } => {
                session.terminate().await;
                Err(ExposeError::Backend {
                    backend: name.to_string(),
                    reason,
                })
            }
            TunnelOutcome::Pending => {
                session.terminate().await;
                Err(ExposeError::Timeout {
                    backend: name.to_string(),
                    waited: self.deadline(),
                })
            }
        }
    }

    pub fn deadline(&self) -> Duration {
        self.gate.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::classifier::BoreClassifier;
    use crate::tunnel::gate::OutcomeSource;
    use crate::tunnel::types::{OutputClassifier, RelayCommand};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Relay stand-in that runs a shell script and speaks bore's grammar.
    struct FakeRelay {
        name: &'static str,
        script: &'static str,
        prepare_fails: bool,
        attempted: Arc<AtomicBool>,
    }

    impl FakeRelay {
        fn new(name: &'static str, script: &'static str) -> Self {
            Self {
                name,
                script,
                prepare_fails: false,
                attempted: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl RelayBackend for FakeRelay {
        fn name(&self) -> &str {
            self.name
        }

        async fn prepare(&self) -> Result<()> {
            self.attempted.store(true, Ordering::SeqCst);
            if self.prepare_fails {
                return Err(ExposeError::Acquisition("download failed (404)".into()));
            }
            Ok(())
        }

        fn command(&self, _local_port: u16) -> RelayCommand {
            RelayCommand::new("sh", ["-c", self.script])
        }

        fn classifier(&self) -> Arc<dyn OutputClassifier> {
            Arc::new(BoreClassifier::new("relay.test"))
        }
    }

    const REFUSED: &str = "echo 'Error: Connection refused (os error 111)' >&2; sleep 5";
    const LOOKUP: &str =
        "echo 'failed to lookup address information: Name does not resolve' >&2; sleep 5";
    const READY: &str = "echo 'INFO bore_cli::client: listening at relay.test:7000'; sleep 5";

    fn orchestrator() -> FallbackOrchestrator {
        FallbackOrchestrator::new(ReadinessGate::new(Duration::from_millis(20), 250))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_first_success_wins_and_later_backends_untouched() {
        let a = FakeRelay::new("a", REFUSED);
        let b = FakeRelay::new("b", READY);
        let c = FakeRelay::new("c", READY);
        let c_attempted = Arc::clone(&c.attempted);

        let tunnel = orchestrator()
            .establish(vec![Box::new(a), Box::new(b), Box::new(c)], 3000)
            .await
            .unwrap();

        assert_eq!(tunnel.backend, "b");
        assert_eq!(tunnel.url, "http://relay.test:7000");
        assert!(!c_attempted.load(Ordering::SeqCst));
        tunnel.session.terminate().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_all_failing_exhausts_fallbacks() {
        let a = FakeRelay::new("a", REFUSED);
        let b = FakeRelay::new("b", LOOKUP);

        let err = orchestrator()
            .establish(vec![Box::new(a), Box::new(b)], 3000)
            .await
            .unwrap_err();

        match err {
            ExposeError::ExhaustedFallbacks { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].contains("'a'"), "got: {:?}", attempts);
                assert!(attempts[1].contains("failed to lookup address"), "got: {:?}", attempts);
            }
            other => panic!("expected ExhaustedFallbacks, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_moves_to_next_backend() {
        let silent = FakeRelay::new("silent", "sleep 5");
        let ok = FakeRelay::new("ok", READY);
        let orchestrator = FallbackOrchestrator::new(ReadinessGate::new(Duration::from_millis(20), 10));

        let tunnel = orchestrator
            .establish(vec![Box::new(silent), Box::new(ok)], 3000)
            .await
            .unwrap();
        assert_eq!(tunnel.backend, "ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_reported_distinctly() {
        let silent = FakeRelay::new("silent", "sleep 5");
        let orchestrator = FallbackOrchestrator::new(ReadinessGate::new(Duration::from_millis(10), 5));

        let err = orchestrator
            .establish(vec![Box::new(silent)], 3000)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("produced no URL"), "got: {}", msg);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_acquisition_failure_falls_through() {
        let mut broken = FakeRelay::new("broken", READY);
        broken.prepare_fails = true;
        let ok = FakeRelay::new("ok", READY);

        let tunnel = orchestrator()
            .establish(vec![Box::new(broken), Box::new(ok)], 3000)
            .await
            .unwrap();
        assert_eq!(tunnel.backend, "ok");
    }

    #[tokio::test]
    async fn test_empty_backend_list() {
        let err = orchestrator().establish(Vec::new(), 3000).await.unwrap_err();
        assert_eq!(err.as_label(), "exhausted_fallbacks");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_markers_follow_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let markers = MarkerFiles::in_dir(tmp.path());
        markers
            .publish(&TunnelOutcome::Ready {
                url: "http://stale:1".into(),
            })
            .unwrap();

        let tunnel = orchestrator()
            .with_markers(markers.clone())
            .establish(vec![Box::new(FakeRelay::new("b", READY))], 3000)
            .await
            .unwrap();
        assert_eq!(markers.snapshot().url(), Some(tunnel.url.as_str()));

        let err = orchestrator()
            .with_markers(markers.clone())
            .establish(vec![Box::new(FakeRelay::new("a", REFUSED))], 3000)
            .await;
        assert!(err.is_err());
        assert!(matches!(markers.snapshot(), TunnelOutcome::Failed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relay_logs_make_session_detachable() {
        let tmp = tempfile::tempdir().unwrap();
        let tunnel = orchestrator()
            .with_relay_logs(tmp.path())
            .establish(vec![Box::new(FakeRelay::new("b", READY))], 3000)
            .await
            .unwrap();

        assert!(tunnel.session.is_detachable());
        let log = std::fs::read_to_string(supervisor::relay_log_path(tmp.path(), "b", "stdout")).unwrap();
        assert!(log.contains("listening at relay.test:7000"));
        tunnel.session.terminate().await;
    }
}
