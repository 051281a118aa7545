//! Relay process supervision.
//!
//! [`launch`] spawns a relay with stdin detached and its stdout/stderr
//! piped. [`launch_with`] can instead point them at log files, which a
//! detached relay keeps writing to after this process is gone. Two listener
//! tasks read the output chunk by chunk, mirror every chunk to the log under
//! the `relay` target, and feed it to the backend's [`OutputClassifier`].
//! The first match resolves the session's [`OutcomeSlot`]. A third task owns
//! the child, logs its exit and kills it on request.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ExposeError, Result};
use crate::tunnel::gate::{OutcomeSlot, ReadinessGate};
use crate::tunnel::types::{OutputClassifier, RelayCommand, TunnelOutcome};

const CHUNK_SIZE: usize = 4096;
const TAIL_INTERVAL: Duration = Duration::from_millis(50);

/// Where a relay's stdout and stderr go.
#[derive(Debug, Clone, Default)]
pub enum RelayOutput {
    /// Pipes read by this process. The relay gets EPIPE on its next write
    /// once this process exits, so a piped relay cannot be detached safely.
    #[default]
    Piped,
    /// `<backend>.stdout.log` and `<backend>.stderr.log` in this directory,
    /// truncated at launch and tailed while supervised.
    LogFiles(PathBuf),
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// One supervised relay process and the outcome it resolved to.
///
/// Dropping the session kills the relay; [`SupervisionSession::detach`]
/// leaves it running instead.
pub struct SupervisionSession {
    backend: String,
    pid: Option<u32>,
    slot: OutcomeSlot,
    started: Instant,
    detachable: bool,
    kill_tx: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

/// Spawn `command` with piped output and start classifying it.
pub fn launch(
    backend: &str,
    command: &RelayCommand,
    classifier: Arc<dyn OutputClassifier>,
) -> Result<SupervisionSession> {
    launch_with(backend, command, classifier, &RelayOutput::Piped)
}

/// Spawn `command`, sending its output to `output`, and start classifying it.
pub fn launch_with(
    backend: &str,
    command: &RelayCommand,
    classifier: Arc<dyn OutputClassifier>,
    output: &RelayOutput,
) -> Result<SupervisionSession> {
    info!(backend, "Starting tunnel: {}", command);

    let mut cmd = Command::new(command.program());
    cmd.args(command.args());
    cmd.stdin(Stdio::null());
    // Keep relay log lines free of ANSI escapes so markers match verbatim.
    cmd.env("NO_COLOR", "1");

    let logs = match output {
        RelayOutput::Piped => {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
            None
        }
        RelayOutput::LogFiles(dir) => {
            let (stdout_writer, stdout_reader) = open_log(backend, dir, Stream::Stdout)?;
            let (stderr_writer, stderr_reader) = open_log(backend, dir, Stream::Stderr)?;
            cmd.stdout(Stdio::from(stdout_writer));
            cmd.stderr(Stdio::from(stderr_writer));
            Some((stdout_reader, stderr_reader))
        }
    };

    let mut child = cmd.spawn().map_err(|e| ExposeError::Backend {
        backend: backend.to_string(),
        reason: format!("failed to spawn {}: {}", command.program().display(), e),
    })?;
    let pid = child.id();

    let slot = OutcomeSlot::new();
    let exited = Arc::new(AtomicBool::new(false));

    match logs {
        None => {
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(pump(
                    stdout,
                    Stream::Stdout,
                    backend.to_string(),
                    Arc::clone(&classifier),
                    slot.clone(),
                    None,
                ));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(pump(
                    stderr,
                    Stream::Stderr,
                    backend.to_string(),
                    classifier,
                    slot.clone(),
                    None,
                ));
            }
        }
        Some((stdout, stderr)) => {
            tokio::spawn(pump(
                tokio::fs::File::from_std(stdout),
                Stream::Stdout,
                backend.to_string(),
                Arc::clone(&classifier),
                slot.clone(),
                Some(Arc::clone(&exited)),
            ));
            tokio::spawn(pump(
                tokio::fs::File::from_std(stderr),
                Stream::Stderr,
                backend.to_string(),
                classifier,
                slot.clone(),
                Some(Arc::clone(&exited)),
            ));
        }
    }

    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let name = backend.to_string();
    let watcher = tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => match status {
                Ok(status) => info!(backend = %name, code = ?status.code(), "Tunnel process exited"),
                Err(e) => warn!(backend = %name, error = %e, "Failed to wait on tunnel process"),
            },
            // A dropped sender means detach: the child is left running.
            Ok(()) = kill_rx => {
                if let Err(e) = child.kill().await {
                    warn!(backend = %name, error = %e, "Failed to kill tunnel process");
                } else {
                    info!(backend = %name, "Tunnel process terminated");
                }
            }
        }
        exited.store(true, Ordering::Release);
    });

    Ok(SupervisionSession {
        backend: backend.to_string(),
        pid,
        slot,
        started: Instant::now(),
        detachable: logs_detachable(output),
        kill_tx: Some(kill_tx),
        watcher: Some(watcher),
    })
}

fn logs_detachable(output: &RelayOutput) -> bool {
    matches!(output, RelayOutput::LogFiles(_))
}

/// Path of the log file a relay's `stream` is written to under `dir`.
pub fn relay_log_path(dir: &Path, backend: &str, stream_name: &str) -> PathBuf {
    dir.join(format!("{}.{}.log", backend, stream_name))
}

/// Truncate the log for `stream` and open it once for the relay to write
/// and once for the tail to read.
fn open_log(backend: &str, dir: &Path, stream: Stream) -> Result<(File, File)> {
    let path = relay_log_path(dir, backend, stream.as_str());
    let log_err = |e: std::io::Error| ExposeError::Backend {
        backend: backend.to_string(),
        reason: format!("failed to open relay log {}: {}", path.display(), e),
    };
    let writer = File::create(&path).map_err(log_err)?;
    let reader = File::open(&path).map_err(log_err)?;
    Ok((writer, reader))
}

async fn pump<R>(
    mut reader: R,
    stream: Stream,
    backend: String,
    classifier: Arc<dyn OutputClassifier>,
    slot: OutcomeSlot,
    exited: Option<Arc<AtomicBool>>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        // A log file reads empty until the relay writes more; only an empty
        // read after the relay exited is the end of its output.
        let finished = exited
            .as_ref()
            .map_or(true, |flag| flag.load(Ordering::Acquire));
        let n = match reader.read(&mut buf).await {
            Ok(0) if finished => break,
            Ok(0) => {
                tokio::time::sleep(TAIL_INTERVAL).await;
                continue;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(backend = %backend, stream = stream.as_str(), error = %e, "Relay output read failed");
                break;
            }
        };
        let chunk = String::from_utf8_lossy(&buf[..n]);
        info!(target: "relay", backend = %backend, stream = stream.as_str(), "{}", chunk.trim_end());

        let verdict = match stream {
            Stream::Stdout => classifier
                .match_success(&chunk)
                .map(|url| TunnelOutcome::Ready { url }),
            Stream::Stderr => classifier
                .match_failure(&chunk)
                .then(|| TunnelOutcome::Failed {
                    reason: chunk.trim().to_string(),
                }),
        };
        if let Some(outcome) = verdict {
            if slot.resolve(outcome.clone()) {
                debug!(backend = %backend, ?outcome, "Tunnel outcome resolved");
            }
        }
    }
    debug!(backend = %backend, stream = stream.as_str(), "Relay output closed");
}

impl SupervisionSession {
    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn outcome(&self) -> TunnelOutcome {
        self.slot.get()
    }

    pub fn slot(&self) -> &OutcomeSlot {
        &self.slot
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Block on `gate` until this session resolves or its deadline passes.
    pub async fn await_outcome(&self, gate: &ReadinessGate) -> TunnelOutcome {
        gate.await_outcome(&self.slot).await
    }

    /// Wait until the relay process exits on its own.
    pub async fn wait(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.await;
        }
    }

    /// Kill the relay and wait for it to be reaped.
    pub async fn terminate(mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        self.wait().await;
    }

    /// Whether the relay's output outlives this process, see [`RelayOutput`].
    pub fn is_detachable(&self) -> bool {
        self.detachable
    }

    /// Stop supervising but leave the relay running.
    pub fn detach(mut self) {
        if !self.detachable {
            warn!(
                backend = %self.backend,
                "Detaching a relay with piped output; it stops at its next write after this process exits"
            );
        }
        info!(backend = %self.backend, pid = ?self.pid, "Detaching from tunnel process");
        self.kill_tx = None;
        self.watcher = None;
    }
}

impl Drop for SupervisionSession {
    fn drop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            if tx.send(()).is_ok() {
                debug!(backend = %self.backend, "SupervisionSession dropped while relay running, killing it");
            }
        }
    }
}

impl std::fmt::Debug for SupervisionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisionSession")
            .field("backend", &self.backend)
            .field("pid", &self.pid)
            .field("detachable", &self.detachable)
            .field("outcome", &self.slot.get())
            .finish()
    }
}
