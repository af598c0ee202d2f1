//! Logging configuration
//!
//! Describes where and how verbosely the application logs. The subscriber itself is
//! installed by the binary; this type only carries settings and file housekeeping.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level name: trace, debug, info, warn, error
    pub level: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Log to stderr
    pub console_output: bool,
    /// Log to a file in `log_dir`
    pub file_output: bool,
    /// Number of log files kept by [`cleanup_old_logs`](Self::cleanup_old_logs)
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("afterglow")
            .join("logs");
        Self {
            level: "info".to_string(),
            log_dir,
            console_output: true,
            file_output: false,
            max_files: 10,
        }
    }
}

impl LogConfig {
    /// Parsed level, falling back to INFO for unknown names
    pub fn parse_level(&self) -> LevelFilter {
        LevelFilter::from_str(self.level.trim()).unwrap_or(LevelFilter::INFO)
    }

    /// Create the log directory if needed
    pub fn ensure_log_directory(&self) -> io::Result<()> {
        fs::create_dir_all(&self.log_dir)
    }

    /// Log file for the current day
    pub fn current_log_path(&self) -> PathBuf {
        let date = chrono::Local::now().format("%Y-%m-%d");
        self.log_dir.join(format!("afterglow-{}.log", date))
    }

    /// Delete the oldest `.log` files beyond `max_files`. Returns how many were removed.
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_dir.exists() {
            return Ok(0);
        }

        let mut logs: Vec<(PathBuf, std::time::SystemTime)> = fs::read_dir(&self.log_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .collect();

        if logs.len() <= self.max_files {
            return Ok(0);
        }

        // Newest first
        logs.sort_by(|a, b| b.1.cmp(&a.1));
        let mut removed = 0;
        for (path, _) in logs.into_iter().skip(self.max_files) {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}
