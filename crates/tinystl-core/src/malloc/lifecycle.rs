//! Structured allocator lifecycle records.
//!
//! Every pool decision appends one record. Records are kept in a bounded
//! buffer (oldest dropped first) and are serializable so callers can export
//! them as JSONL.

use std::collections::VecDeque;

use serde::Serialize;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Counters captured alongside every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogSnapshot {
    /// Small blocks currently handed out.
    pub live_blocks: usize,
    /// Blocks queued on all free lists.
    pub free_blocks: usize,
    /// Bytes left in the current arena.
    pub arena_remaining: usize,
    /// Cumulative bytes obtained for arenas.
    pub heap_size: usize,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`allocate`, `deallocate`, `refill`, `chunk_alloc`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `arena_grow`, `scavenge`, ...).
    pub event: &'static str,
    /// Block address involved in the event.
    pub addr: Option<usize>,
    /// Byte count involved in the event.
    pub size: Option<usize>,
    /// Size-class index (`NUM_FREE_LISTS` for the direct path).
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Counter snapshot at the time of the event.
    pub snapshot: LogSnapshot,
}

/// Fields of a record before ids are assigned.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub level: AllocatorLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub addr: Option<usize>,
    pub size: Option<usize>,
    pub class: Option<usize>,
    pub outcome: &'static str,
    pub details: String,
}

/// Bounded buffer of lifecycle records.
#[derive(Debug, Clone)]
pub struct LifecycleLog {
    records: VecDeque<AllocatorLogRecord>,
    capacity: usize,
    next_decision_id: u64,
    dropped: u64,
    enabled: bool,
}

impl LifecycleLog {
    /// Creates a log retaining at most `capacity` records.
    #[must_use]
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
            next_decision_id: 1,
            dropped: 0,
            enabled,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    /// Appends a record, evicting the oldest one when full.
    pub fn record(&mut self, event: LogEvent, snapshot: LogSnapshot) {
        if !self.enabled || self.capacity == 0 {
            return;
        }
        let decision_id = self.next_id();
        let trace_id = format!("core::pool::{}::{:016x}", event.symbol, decision_id);
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(AllocatorLogRecord {
            decision_id,
            trace_id,
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            addr: event.addr,
            size: event.size,
            class: event.class,
            outcome: event.outcome,
            details: event.details,
            snapshot,
        });
    }

    /// Currently retained records, oldest first.
    pub fn records(&self) -> impl ExactSizeIterator<Item = &AllocatorLogRecord> {
        self.records.iter()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records evicted because the buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Removes and returns every retained record.
    pub fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        self.records.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(symbol: &'static str) -> LogEvent {
        LogEvent {
            level: AllocatorLogLevel::Trace,
            symbol,
            event: "alloc",
            addr: Some(0x1000),
            size: Some(8),
            class: Some(0),
            outcome: "success",
            details: String::new(),
        }
    }

    #[test]
    fn ids_are_monotonic_and_traced() {
        let mut log = LifecycleLog::new(8, true);
        log.record(event("allocate"), LogSnapshot::default());
        log.record(event("deallocate"), LogSnapshot::default());

        let records = log.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision_id, 1);
        assert_eq!(records[1].decision_id, 2);
        assert_eq!(records[0].trace_id, "core::pool::allocate::0000000000000001");
        assert!(log.is_empty());
    }

    #[test]
    fn bounded_buffer_drops_oldest() {
        let mut log = LifecycleLog::new(2, true);
        for _ in 0..5 {
            log.record(event("allocate"), LogSnapshot::default());
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 3);
        let ids: Vec<u64> = log.records().map(|r| r.decision_id).collect();
        assert_eq!(ids, vec![4, 5]);
    }

    #[test]
    fn disabled_log_keeps_nothing() {
        let mut log = LifecycleLog::new(16, false);
        log.record(event("allocate"), LogSnapshot::default());
        assert!(log.is_empty());
        assert_eq!(log.dropped(), 0);
    }

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(AllocatorLogLevel::Trace < AllocatorLogLevel::Debug);
        assert!(AllocatorLogLevel::Warn < AllocatorLogLevel::Error);
    }
}
