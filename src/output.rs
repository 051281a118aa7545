//! Publishing results back to the pipeline.
//!
//! On a GitHub Actions runner outputs are appended as `name=value` lines to
//! the file named by `$GITHUB_OUTPUT`; anywhere else they go to stdout.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::error::{ExposeError, Result};

/// Output name under which the public URL is published.
pub const TUNNEL_URL_OUTPUT: &str = "tunnel-url";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// Append to a runner-provided output file.
    File(PathBuf),
    Stdout,
}

impl OutputSink {
    pub fn from_env() -> Self {
        match std::env::var_os("GITHUB_OUTPUT") {
            Some(path) if !path.is_empty() => OutputSink::File(PathBuf::from(path)),
            _ => OutputSink::Stdout,
        }
    }

    pub fn publish(&self, name: &str, value: &str) -> Result<()> {
        if value.contains(|c: char| c == '\n' || c == '\r') {
            return Err(ExposeError::Config(format!(
                "output '{}' must be a single line",
                name
            )));
        }
        match self {
            OutputSink::File(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                writeln!(file, "{}={}", name, value)?;
            }
            OutputSink::Stdout => println!("{}={}", name, value),
        }
        Ok(())
    }
}
