//! Append-only history log.
//!
//! Process-scoped sink for the one-line market summaries and trade events.
//! Opened explicitly at startup and flushed on shutdown; appends are
//! best-effort and never fail the caller.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;

pub struct HistoryLog {
    file: Mutex<Option<File>>,
}

impl HistoryLog {
    /// Open (or create) the log file in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open history log: {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(Some(file)),
        })
    }

    /// A sink that drops every line. Used when no history path is configured
    /// and in tests.
    pub fn disabled() -> Self {
        Self {
            file: Mutex::new(None),
        }
    }

    /// Append one line. Write errors are logged and swallowed.
    pub fn append_line(&self, line: &str) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                warn!("History log write failed: {e}");
            }
        }
    }

    /// Flush buffered writes. Called once on shutdown.
    pub fn flush(&self) {
        let Ok(mut guard) = self.file.lock() else {
            return;
        };
        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.flush() {
                warn!("History log flush failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_lines_to_file() {
        let path = std::env::temp_dir().join(format!("hedge-history-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let log = HistoryLog::open(&path).unwrap();
        log.append_line("BTC 15m Up Token BID:$0.52 ASK:$0.53");
        log.append_line("BTC 15m: UP dump detected");
        log.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("dump detected"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_disabled_sink_is_silent() {
        let log = HistoryLog::disabled();
        log.append_line("dropped");
        log.flush();
    }
}
