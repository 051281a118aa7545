//! expose-tunnel: expose a local port through a public relay and report
//! the URL.
//!
//! The relay itself (bore or an SSH session to localhost.run) runs as a
//! supervised child process; this crate launches it, reads the public
//! address out of its output and falls back to the next configured relay
//! when one fails or stays silent.

pub mod acquire;
pub mod config;
pub mod error;
pub mod output;
pub mod signals;
pub mod tunnel;

pub use config::TunnelConfig;
pub use error::{ExposeError, Result};
