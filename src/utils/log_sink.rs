//! Append-only diagnostic sinks
//!
//! The recorder writes short human-readable lines (orientation retries,
//! acquisition failures) to a sink supplied by the embedding UI.

use chrono::Local;
use parking_lot::Mutex;

/// Append-only text sink supplied by the embedding UI
pub trait LogSink: Send + Sync {
    fn append(&self, line: &str);
}

/// Prefix a line with the local wall-clock time
pub fn stamp(line: &str) -> String {
    format!("{} {}", Local::now().format("%H:%M:%S"), line)
}

/// Sink that keeps every line in memory
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<String>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all lines appended so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, line: &str) {
        self.lines.lock().push(stamp(line));
    }
}

/// Sink that forwards lines to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn append(&self, line: &str) {
        tracing::info!(target: "camera_recorder::log_sink", "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_appends_in_order() {
        let sink = MemoryLogSink::new();
        sink.append("first");
        sink.append("second");

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" first"));
        assert!(lines[1].ends_with(" second"));
    }

    #[test]
    fn test_stamp_prefixes_time() {
        let line = stamp("hello");
        // HH:MM:SS + space
        assert_eq!(line.len(), "00:00:00 hello".len());
        assert_eq!(&line[2..3], ":");
    }
}
