// hy2-launch Library
//
// This file exposes the launcher modules for use in integration tests and
// embedding.

pub mod cert;
pub mod config;
pub mod error;
pub mod install;
pub mod launcher;
pub mod render;
pub mod runlog;
pub mod supervisor;

// Re-export key types for easier access
pub use crate::config::{Paths, Settings};
pub use crate::error::LaunchError;
pub use crate::launcher::Launcher;
