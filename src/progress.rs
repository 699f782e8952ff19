//! Append-only progress log.
//!
//! Each project run appends timestamped, leveled lines to a plain-text
//! log next to the workbook so external observers (GUIs, watchdogs) can
//! tail progress while the run is live. Lines are flushed as written and
//! the file is never truncated by the pipeline. Everything logged here
//! is mirrored to `tracing`.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Handle to one project's progress log file.
#[derive(Debug, Clone)]
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    /// Attach to (or create on first write) the log at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn info(&self, message: &str) {
        info!("{message}");
        self.append("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{message}");
        self.append("WARN", message);
    }

    pub fn error(&self, message: &str) {
        error!("{message}");
        self.append("ERROR", message);
    }

    fn append(&self, level: &str, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{timestamp}] [{level}] {message}\n");

        // Log writing must never take the pipeline down.
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "progress log append failed");
        }
    }

    /// Last `count` lines of a progress log, oldest first.
    pub fn tail(path: &Path, count: usize) -> Vec<String> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(count);
                lines[start..].iter().map(|s| s.to_string()).collect()
            }
            Err(_) => Vec::new(),
        }
    }
}
