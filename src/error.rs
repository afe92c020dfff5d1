//! Launcher failure kinds.
//!
//! Everything else flows through `anyhow` with context; these are the cases
//! callers (and tests) want to match on.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("invalid setting {name}: {reason}")]
    Setting { name: &'static str, reason: String },

    #[error("download of {url} failed: HTTP {status}")]
    Download { url: String, status: u16 },

    #[error("downloaded file {path} is not an ELF executable (got {magic:02x?}); the URL probably served an HTML page")]
    NotElf { path: PathBuf, magic: Vec<u8> },

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
