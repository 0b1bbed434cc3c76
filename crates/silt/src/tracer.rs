//! Statement tracing.
//!
//! A bounded ring of executed statements with call-site context, kept
//! process-wide for post-hoc inspection of what the datastore actually
//! sent to the engine. The disabled path is a single atomic load so
//! tracing can stay compiled into the hot path.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};

/// Entries kept after a truncation pass.
pub const DEFAULT_MAX_ENTRIES: usize = 5000;

/// The ring is allowed to overshoot by this much before truncating, so
/// appends stay O(1) amortized.
const TRUNCATE_SLACK: usize = 100;

/// Frames whose symbols mark a process boundary; context capture stops
/// there.
const BOUNDARY_MARKERS: &[&str] = &[
    "::main",
    "tokio::runtime",
    "spawn_process",
    "dispatch_request",
];

const MAX_CONTEXT_FRAMES: usize = 5;

#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub statement: String,
    pub rowcount: u64,
    /// Stack frames walking upward from the call site, oldest first.
    pub context: Vec<String>,
}

#[derive(Default)]
struct TracerInner {
    next_seq: u64,
    log: VecDeque<TraceEntry>,
}

pub struct StatementTracer {
    enabled: AtomicBool,
    max_entries: usize,
    inner: Mutex<TracerInner>,
}

impl StatementTracer {
    pub fn new(enabled: bool) -> Self {
        Self::with_capacity(enabled, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(enabled: bool, max_entries: usize) -> Self {
        StatementTracer {
            enabled: AtomicBool::new(enabled),
            max_entries,
            inner: Mutex::new(TracerInner::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable tracing. Disabling clears the ring.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.clear();
        }
    }

    /// Record one executed statement. No-op while disabled.
    pub fn record(&self, statement: &str, rowcount: u64) {
        if !self.is_enabled() {
            return;
        }
        let context = capture_context();
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.log.push_back(TraceEntry {
            seq,
            ts: Utc::now(),
            statement: statement.to_owned(),
            rowcount,
            context,
        });
        if inner.log.len() > self.max_entries + TRUNCATE_SLACK {
            let excess = inner.log.len() - self.max_entries;
            inner.log.drain(..excess);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.log.clear();
    }

    /// Snapshot of the ring, oldest entry first.
    pub fn entries(&self) -> Vec<TraceEntry> {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.log.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render one entry the way the statement log prints it.
    pub fn format_entry(entry: &TraceEntry, truncate: usize) -> String {
        let mut out = format!(
            "SQL #{} @{} -> {}\n",
            entry.seq,
            entry.ts.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.rowcount
        );
        if truncate > 0 && entry.statement.len() > truncate {
            out.push_str(&entry.statement[..truncate]);
            out.push_str("...");
        } else {
            out.push_str(&entry.statement);
        }
        for frame in &entry.context {
            out.push_str("\n ");
            out.push_str(frame);
        }
        out
    }
}

/// Capture up to [`MAX_CONTEXT_FRAMES`] frames above the datastore,
/// stopping at a known process boundary.
fn capture_context() -> Vec<String> {
    let bt = std::backtrace::Backtrace::force_capture().to_string();
    let mut frames = Vec::new();
    for line in bt.lines() {
        let line = line.trim();
        // frame lines look like "12: path::to::symbol"; location lines
        // ("at src/file.rs:10:5") are skipped
        let Some((index, symbol)) = line.split_once(": ") else {
            continue;
        };
        if index.parse::<usize>().is_err() {
            continue;
        }
        if symbol.contains("backtrace") || symbol.contains("tracer") {
            continue;
        }
        let is_boundary = BOUNDARY_MARKERS.iter().any(|m| symbol.contains(m));
        frames.push(symbol.to_owned());
        if is_boundary || frames.len() >= MAX_CONTEXT_FRAMES {
            break;
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let tracer = StatementTracer::new(true);
        tracer.record("SELECT 1", 1);
        tracer.record("SELECT 2", 1);
        let entries = tracer.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
        assert_eq!(entries[1].statement, "SELECT 2");
    }

    #[test]
    fn ring_stays_bounded() {
        let tracer = StatementTracer::with_capacity(true, 10);
        for i in 0..150 {
            tracer.record(&format!("SELECT {i}"), 0);
        }
        // bounded by max + slack, truncated back to max when exceeded
        assert!(tracer.len() <= 10 + 100);
        let entries = tracer.entries();
        // newest entry always survives truncation
        assert_eq!(entries.last().unwrap().statement, "SELECT 149");
    }

    #[test]
    fn disabled_tracer_records_nothing() {
        let tracer = StatementTracer::new(false);
        tracer.record("SELECT 1", 1);
        assert!(tracer.is_empty());
    }

    #[test]
    fn disabling_clears_the_ring() {
        let tracer = StatementTracer::new(true);
        tracer.record("SELECT 1", 1);
        tracer.set_enabled(false);
        assert!(tracer.is_empty());
    }

    #[test]
    fn format_entry_truncates_long_statements() {
        let tracer = StatementTracer::new(true);
        tracer.record(&"x".repeat(100), 3);
        let entries = tracer.entries();
        let text = StatementTracer::format_entry(&entries[0], 10);
        assert!(text.contains(&"x".repeat(10)));
        assert!(text.contains("..."));
        assert!(text.starts_with("SQL #0"));
    }
}
