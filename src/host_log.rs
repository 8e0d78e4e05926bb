//! Centralized host log ring buffer.
//!
//! Stores structured log entries (level, source extension, message) in a
//! fixed-capacity circular buffer. The per-extension `log` API namespace
//! and protocol `log` messages push entries; the embedding app retrieves
//! them for its log panel. Entries are mirrored to `tracing` so they also
//! land in whatever subscriber the embedder installed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A single log entry stored in the ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    pub timestamp_ms: i64,
    pub level: LogLevel,
    /// Extension name (or `host` for host-originated entries).
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

pub(crate) const LOG_RING_CAPACITY: usize = 1000;

/// Fixed-capacity circular buffer for structured log entries.
pub struct LogRingBuffer {
    inner: Mutex<RingInner>,
}

struct RingInner {
    entries: Vec<Option<LogEntry>>,
    capacity: usize,
    /// Write position (wraps around)
    write_pos: usize,
    /// Number of entries currently stored (≤ capacity)
    count: usize,
    /// Monotonically increasing ID for the next entry
    next_id: u64,
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self {
            inner: Mutex::new(RingInner {
                entries,
                capacity,
                write_pos: 0,
                count: 0,
                next_id: 1,
            }),
        }
    }

    /// Push a new entry. Returns the assigned entry ID.
    pub fn push(&self, level: LogLevel, source: &str, message: &str) -> u64 {
        match level {
            LogLevel::Debug => tracing::debug!("[{source}] {message}"),
            LogLevel::Info => tracing::info!("[{source}] {message}"),
            LogLevel::Warn => tracing::warn!("[{source}] {message}"),
            LogLevel::Error => tracing::error!("[{source}] {message}"),
        }

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        let entry = LogEntry {
            id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            level,
            source: source.to_string(),
            message: message.to_string(),
        };

        let pos = inner.write_pos;
        inner.entries[pos] = Some(entry);
        inner.write_pos = (pos + 1) % inner.capacity;
        if inner.count < inner.capacity {
            inner.count += 1;
        }

        id
    }

    /// Return entries in chronological order (oldest first), up to `limit`.
    /// If `limit` is 0, returns all entries.
    pub fn entries(&self, limit: usize) -> Vec<LogEntry> {
        let inner = self.inner.lock();
        if inner.count == 0 {
            return Vec::new();
        }

        let effective_limit = if limit == 0 { inner.count } else { limit.min(inner.count) };

        // write_pos points to the oldest entry once the buffer is full
        let start = if inner.count < inner.capacity { 0 } else { inner.write_pos };

        let skip = inner.count - effective_limit;
        let mut result = Vec::with_capacity(effective_limit);
        for i in skip..inner.count {
            let idx = (start + i) % inner.capacity;
            if let Some(entry) = &inner.entries[idx] {
                result.push(entry.clone());
            }
        }

        result
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_increasing_ids() {
        let ring = LogRingBuffer::new(8);
        let a = ring.push(LogLevel::Info, "wf", "one");
        let b = ring.push(LogLevel::Info, "wf", "two");
        assert!(b > a);
    }

    #[test]
    fn entries_come_back_oldest_first() {
        let ring = LogRingBuffer::new(8);
        ring.push(LogLevel::Info, "wf", "one");
        ring.push(LogLevel::Warn, "wf", "two");
        let entries = ring.entries(0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "one");
        assert_eq!(entries[1].message, "two");
    }

    #[test]
    fn wrap_around_drops_oldest() {
        let ring = LogRingBuffer::new(3);
        for i in 0..5 {
            ring.push(LogLevel::Debug, "wf", &format!("msg-{i}"));
        }
        let entries = ring.entries(0);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "msg-2");
        assert_eq!(entries[2].message, "msg-4");
    }

    #[test]
    fn limit_returns_most_recent() {
        let ring = LogRingBuffer::new(8);
        for i in 0..4 {
            ring.push(LogLevel::Info, "wf", &format!("msg-{i}"));
        }
        let entries = ring.entries(2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "msg-2");
        assert_eq!(entries[1].message, "msg-3");
    }
}
