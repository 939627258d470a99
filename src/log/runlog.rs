//! Acquisition session log.
//!
//! Every engine-level operation (run start/stop, spectrum resets,
//! envelope learning) is recorded with a timestamp and a sequence
//! number, so an acquisition session can be reconstructed afterwards.
//! Exports as human-readable text or JSON.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// A single logged operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequential operation number (1-based).
    pub sequence: usize,
    pub timestamp: DateTime<Local>,
    /// Short operation name.
    pub operation: String,
    /// Detail line, e.g. parameters or counts.
    pub detail: String,
}

impl LogEntry {
    pub fn to_text(&self) -> String {
        format!(
            "[{:03}] {} | {} | {}",
            self.sequence,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.operation,
            self.detail
        )
    }
}

/// The session log: ordered operations plus session metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    pub session_id: String,
    pub session_start: DateTime<Local>,
    pub software_version: String,
    pub entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_start: Local::now(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            entries: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, operation: &str, detail: &str) {
        let seq = self.entries.len() + 1;
        self.entries.push(LogEntry {
            sequence: seq,
            timestamp: Local::now(),
            operation: operation.to_string(),
            detail: detail.to_string(),
        });
        log::info!("[{seq:03}] {operation} — {detail}");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Export as human-readable text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("═══════════════════════════════════════════════\n");
        out.push_str("  Acquisition Session Log\n");
        out.push_str("═══════════════════════════════════════════════\n");
        out.push_str(&format!("  Session ID: {}\n", self.session_id));
        out.push_str(&format!(
            "  Started:    {}\n",
            self.session_start.format("%Y-%m-%d %H:%M:%S")
        ));
        out.push_str(&format!("  Engine:     v{}\n", self.software_version));
        out.push_str(&format!("  Operations: {}\n", self.entries.len()));
        out.push_str("───────────────────────────────────────────────\n");
        for entry in &self.entries {
            out.push_str(&entry.to_text());
            out.push('\n');
        }
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("JSON error: {e}"))
    }

    pub fn save_text(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_text())
    }

    pub fn save_json(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_json())
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sequencing() {
        let mut log = RunLog::new();
        assert!(log.is_empty());
        log.add_entry("Run started", "multi-threaded, chunk size 128");
        log.add_entry("Run stopped", "51234 pairs");
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries[0].sequence, 1);
        assert_eq!(log.entries[1].sequence, 2);
    }

    #[test]
    fn test_text_export_contains_entries() {
        let mut log = RunLog::new();
        log.add_entry("Spectra reset", "");
        let text = log.to_text();
        assert!(text.contains("Spectra reset"));
        assert!(text.contains(&log.session_id));
    }

    #[test]
    fn test_json_roundtrip() {
        let mut log = RunLog::new();
        log.add_entry("Envelope learned", "channel A, 1000 pulses");
        let parsed: RunLog = serde_json::from_str(&log.to_json()).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].operation, "Envelope learned");
    }
}
