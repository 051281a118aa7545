//! Readiness signalling between relay output listeners and the orchestrator.
//!
//! A supervision attempt publishes its [`TunnelOutcome`] through an
//! [`OutcomeSource`]: either the in-process [`OutcomeSlot`] or the on-disk
//! [`MarkerFiles`] that a separate process can poll. [`ReadinessGate`]
//! waits on either one with a bounded number of polls.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::config::ReadinessConfig;
use crate::error::Result;
use crate::tunnel::types::TunnelOutcome;

pub const READY_MARKER_FILE: &str = ".tunnel-is-ready";
pub const URL_MARKER_FILE: &str = ".tunnel-url";

/// Anything the gate can poll for the current outcome.
pub trait OutcomeSource: Send + Sync {
    fn snapshot(&self) -> TunnelOutcome;
}

/// Single-writer terminal outcome cell shared with the output listeners.
///
/// The first call to [`OutcomeSlot::resolve`] wins; later calls are no-ops.
#[derive(Debug, Clone)]
pub struct OutcomeSlot {
    inner: Arc<Mutex<TunnelOutcome>>,
}

impl OutcomeSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TunnelOutcome::Pending)),
        }
    }

    /// Move the slot out of `Pending`. Returns `false` if it was already resolved.
    pub fn resolve(&self, outcome: TunnelOutcome) -> bool {
        if outcome.is_pending() {
            return false;
        }
        let mut current = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !current.is_pending() {
            return false;
        }
        *current = outcome;
        true
    }

    pub fn get(&self) -> TunnelOutcome {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for OutcomeSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeSource for OutcomeSlot {
    fn snapshot(&self) -> TunnelOutcome {
        self.get()
    }
}

/// File-backed outcome for readers in another process.
///
/// Absence of the ready file means pending. The URL file is always written
/// before the ready file, so a reader that sees `ready` can read the URL.
#[derive(Debug, Clone)]
pub struct MarkerFiles {
    ready: PathBuf,
    url: PathBuf,
}

impl MarkerFiles {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            ready: dir.join(READY_MARKER_FILE),
            url: dir.join(URL_MARKER_FILE),
        }
    }

    /// Remove stale markers left by an earlier run.
    pub fn clear(&self) -> Result<()> {
        for path in [&self.ready, &self.url] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn publish(&self, outcome: &TunnelOutcome) -> Result<()> {
        match outcome {
            TunnelOutcome::Pending => {}
            TunnelOutcome::Ready { url } => {
                fs::write(&self.url, url)?;
                fs::write(&self.ready, "ready")?;
            }
            TunnelOutcome::Failed { reason } => {
                fs::write(&self.ready, format!("failed: {}", reason.trim()))?;
            }
        }
        Ok(())
    }
}

impl OutcomeSource for MarkerFiles {
    fn snapshot(&self) -> TunnelOutcome {
        let status = match fs::read_to_string(&self.ready) {
            Ok(status) => status,
            Err(_) => return TunnelOutcome::Pending,
        };
        let status = status.trim();
        if status.is_empty() {
            return TunnelOutcome::Pending;
        }
        if let Some(reason) = status.strip_prefix("failed") {
            return TunnelOutcome::Failed {
                reason: reason.trim_start_matches(':').trim().to_string(),
            };
        }
        match fs::read_to_string(&self.url) {
            Ok(url) if !url.trim().is_empty() => TunnelOutcome::Ready {
                url: url.trim().to_string(),
            },
            _ => TunnelOutcome::Pending,
        }
    }
}

/// Bounded wait for an outcome to leave `Pending`.
///
/// Polls every `poll_interval` for at most `max_attempts` attempts, so a
/// source that never resolves is reported as `Pending` after
/// `poll_interval * max_attempts`.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessGate {
    poll_interval: Duration,
    max_attempts: u32,
}

impl ReadinessGate {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts,
        }
    }

    /// Total time a never-resolving source is waited for.
    pub fn deadline(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }

    pub async fn await_outcome(&self, source: &dyn OutcomeSource) -> TunnelOutcome {
        for attempt in 0..self.max_attempts {
            let outcome = source.snapshot();
            if !outcome.is_pending() {
                debug!(attempt, "readiness resolved");
                return outcome;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        source.snapshot()
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_POLL_INTERVAL, Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl From<&ReadinessConfig> for ReadinessGate {
    fn from(config: &ReadinessConfig) -> Self {
        Self::new(
            Duration::from_millis(config.poll_interval_ms),
            config.max_attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingSource {
        polls: AtomicU32,
    }

    impl OutcomeSource for CountingSource {
        fn snapshot(&self) -> TunnelOutcome {
            self.polls.fetch_add(1, Ordering::SeqCst);
            TunnelOutcome::Pending
        }
    }

    #[test]
    fn test_slot_first_writer_wins() {
        let slot = OutcomeSlot::new();
        assert!(slot.get().is_pending());
        assert!(slot.resolve(TunnelOutcome::Ready {
            url: "http://bore.pub:1".into()
        }));
        assert!(!slot.resolve(TunnelOutcome::Failed {
            reason: "Connection refused".into()
        }));
        assert_eq!(
            slot.get(),
            TunnelOutcome::Ready {
                url: "http://bore.pub:1".into()
            }
        );
    }

    #[test]
    fn test_slot_ignores_pending_writes() {
        let slot = OutcomeSlot::new();
        assert!(!slot.resolve(TunnelOutcome::Pending));
        assert!(slot.resolve(TunnelOutcome::Failed {
            reason: "boom".into()
        }));
        assert!(!slot.resolve(TunnelOutcome::Ready { url: "x".into() }));
        assert!(matches!(slot.get(), TunnelOutcome::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_times_out_after_exact_attempts() {
        let source = CountingSource {
            polls: AtomicU32::new(0),
        };
        let gate = ReadinessGate::new(Duration::from_millis(200), 50);
        let start = tokio::time::Instant::now();
        let outcome = gate.await_outcome(&source).await;
        let elapsed = start.elapsed();

        assert!(outcome.is_pending());
        assert_eq!(elapsed, Duration::from_secs(10));
        assert_eq!(source.polls.load(Ordering::SeqCst), 51);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_returns_as_soon_as_resolved() {
        let slot = OutcomeSlot::new();
        let writer = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(900)).await;
            writer.resolve(TunnelOutcome::Ready {
                url: "http://bore.pub:9".into(),
            });
        });

        let gate = ReadinessGate::new(Duration::from_millis(200), 100);
        let start = tokio::time::Instant::now();
        let outcome = gate.await_outcome(&slot).await;

        assert_eq!(outcome.url(), Some("http://bore.pub:9"));
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_gate_zero_attempts_checks_once() {
        let slot = OutcomeSlot::new();
        slot.resolve(TunnelOutcome::Failed {
            reason: "refused".into(),
        });
        let gate = ReadinessGate::new(Duration::from_millis(200), 0);
        assert!(matches!(
            gate.await_outcome(&slot).await,
            TunnelOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_gate_default_deadline() {
        assert_eq!(ReadinessGate::default().deadline(), Duration::from_secs(20));
    }

    #[test]
    fn test_marker_files_roundtrip_states() {
        let tmp = tempfile::tempdir().unwrap();
        let markers = MarkerFiles::in_dir(tmp.path());

        assert!(markers.snapshot().is_pending());

        markers
            .publish(&TunnelOutcome::Ready {
                url: "https://abc.lhr.life".into(),
            })
            .unwrap();
        assert_eq!(markers.snapshot().url(), Some("https://abc.lhr.life"));

        markers.clear().unwrap();
        assert!(markers.snapshot().is_pending());
        // Clearing twice is fine.
        markers.clear().unwrap();

        markers
            .publish(&TunnelOutcome::Failed {
                reason: "Connection refused\n".into(),
            })
            .unwrap();
        assert_eq!(
            markers.snapshot(),
            TunnelOutcome::Failed {
                reason: "Connection refused".into()
            }
        );
    }

    #[test]
    fn test_marker_ready_without_url_is_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let markers = MarkerFiles::in_dir(tmp.path());
        std::fs::write(tmp.path().join(READY_MARKER_FILE), "ready").unwrap();
        assert!(markers.snapshot().is_pending());
    }

    #[tokio::test]
    async fn test_gate_over_marker_files() {
        let tmp = tempfile::tempdir().unwrap();
        let markers = MarkerFiles::in_dir(tmp.path());
        let writer = markers.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            writer
                .publish(&TunnelOutcome::Ready {
                    url: "http://bore.pub:4242".into(),
                })
                .unwrap();
        });

        let gate = ReadinessGate::new(Duration::from_millis(10), 200);
        let outcome = gate.await_outcome(&markers).await;
        assert_eq!(outcome.url(), Some("http://bore.pub:4242"));
    }
}
