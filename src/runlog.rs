//! Buffered, append-only run log.
//!
//! Lines are held in memory and written to `run.log` on [`RunLog::flush`].
//! Every line is mirrored to `tracing` as it is recorded.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    buffer: Mutex<Vec<String>>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a timestamped line
    pub fn log(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        info!("{}", msg);
        let line = format!(
            "[{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            msg
        );
        self.buffer.lock().push(line);
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Append buffered lines to the log file and clear the buffer
    pub fn flush(&self) -> Result<()> {
        let mut buffer = self.buffer.lock();
        if buffer.is_empty() {
            return Ok(());
        }

        let mut chunk = buffer.join("\n");
        chunk.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open run log: {}", self.path.display()))?;
        file.write_all(chunk.as_bytes())
            .with_context(|| format!("Failed to append run log: {}", self.path.display()))?;

        buffer.clear();
        Ok(())
    }
}
