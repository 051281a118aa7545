//! Output classifiers for relay processes.
//!
//! Each relay prints its public address in its own unstructured format.
//! The functions here look at a single chunk of output at a time and never
//! buffer across chunks, so a marker split over two reads is missed.

use crate::tunnel::types::OutputClassifier;

/// Phrases bore prints on stderr when it cannot reach its server.
///
/// The wording changed between bore releases, so all known variants are kept.
pub const BORE_FAILURE_PHRASES: &[&str] = &[
    "failed to lookup address",
    "Connection refused",
    "could not connect to",
];

/// Extract a bore tunnel URL from a chunk of `bore local` stdout.
///
/// bore logs a line such as
/// `INFO bore_cli::client: listening at bore.pub:41935`. Everything after
/// `endpoint` up to the next whitespace is the `:port` part.
pub fn extract_bore_url(chunk: &str, endpoint: &str) -> Option<String> {
    if endpoint.is_empty() {
        return None;
    }
    let start = chunk.find(endpoint)? + endpoint.len();
    let remainder = chunk[start..]
        .split(char::is_whitespace)
        .next()
        .unwrap_or("");
    if remainder.is_empty() {
        return None;
    }
    Some(format!("http://{}{}", endpoint, remainder))
}

/// Whether a chunk of bore stderr reports a connection failure.
pub fn is_bore_failure(chunk: &str) -> bool {
    BORE_FAILURE_PHRASES
        .iter()
        .any(|phrase| chunk.contains(phrase))
}

/// Extract the tunnel URL from localhost.run's SSH session output.
///
/// The banner looks like
/// `5adf5e96447668.lhr.life tunneled with tls termination, https://5adf5e96447668.lhr.life`.
pub fn extract_ssh_url(chunk: &str) -> Option<String> {
    let start = chunk.find("http")? + "http".len();
    let remainder = chunk[start..]
        .split(char::is_whitespace)
        .next()
        .unwrap_or("");
    if remainder.is_empty() {
        return None;
    }
    Some(format!("http{}", remainder))
}

/// Classifier for bore, bound to the server address passed via `--to`.
#[derive(Debug, Clone)]
pub struct BoreClassifier {
    endpoint: String,
}

impl BoreClassifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

impl OutputClassifier for BoreClassifier {
    fn match_success(&self, chunk: &str) -> Option<String> {
        extract_bore_url(chunk, &self.endpoint)
    }

    fn match_failure(&self, chunk: &str) -> bool {
        is_bore_failure(chunk)
    }
}

/// Classifier for localhost.run. It has no failure vocabulary.
#[derive(Debug, Clone, Default)]
pub struct SshClassifier;

impl OutputClassifier for SshClassifier {
    fn match_success(&self, chunk: &str) -> Option<String> {
        extract_ssh_url(chunk)
    }
}
