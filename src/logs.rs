//! Captured browser events and the bounded ring buffers that hold them.
//!
//! The ring buffer is the single meeting point between the capture tasks
//! (producers) and HTTP readers (consumers), so everything else in the
//! server stays lock-free with respect to log traffic. Reads are
//! snapshot-consistent: the short mutex is held for the whole query, so a
//! reader never observes a torn or partially-evicted view.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Console ring capacity per page.
pub const CONSOLE_CAPACITY: usize = 1000;

/// Network ring capacity per page.
pub const NETWORK_CAPACITY: usize = 500;

/// Console message severity, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleKind {
    Log,
    Info,
    Warning,
    Error,
    Debug,
    Trace,
}

impl ConsoleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Lenient mapping from backend kind strings; anything unrecognized
    /// (dir, table, assert, ...) is folded into `log`.
    pub fn from_backend(s: &str) -> Self {
        match s {
            "info" => Self::Info,
            "warning" | "warn" => Self::Warning,
            "error" | "assert" => Self::Error,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Log,
        }
    }
}

/// One captured console message. Immutable after append.
#[derive(Debug, Clone)]
pub struct ConsoleEvent {
    pub ts: DateTime<Utc>,
    pub kind: ConsoleKind,
    pub text: String,
    pub location: Option<String>,
    pub args: Vec<Value>,
}

/// Direction of a captured network event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkDirection {
    Request,
    Response,
    Failed,
}

/// One captured network event. Immutable after append.
#[derive(Debug, Clone)]
pub struct NetworkEvent {
    pub ts: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub direction: NetworkDirection,
    pub status: Option<i64>,
    pub failure: Option<String>,
}

/// Conjunctive filter over console events.
#[derive(Debug, Clone, Default)]
pub struct ConsoleFilter {
    /// Match any of these kind strings; `None` matches all kinds.
    pub kinds: Option<Vec<String>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring over `text`.
    pub contains: Option<String>,
}

impl ConsoleFilter {
    pub fn matches(&self, event: &ConsoleEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.iter().any(|k| k == event.kind.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.ts < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.ts > until {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            if !event
                .text
                .to_lowercase()
                .contains(&needle.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Time-window filter over network events.
#[derive(Debug, Clone, Default)]
pub struct NetworkFilter {
    pub since: Option<DateTime<Utc>>,
}

impl NetworkFilter {
    pub fn matches(&self, event: &NetworkEvent) -> bool {
        match self.since {
            Some(since) => event.ts >= since,
            None => true,
        }
    }
}

/// Fixed-capacity, time-ordered event store. Appends evict the oldest
/// entry when full; queries return the most recent matches in append
/// order (oldest first).
#[derive(Debug)]
pub struct RingBuffer<T> {
    inner: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn append(&self, event: T) {
        let mut buf = lock_unpoisoned(&self.inner);
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(event);
    }

    /// The most recent `limit` events matching `filter`, oldest first.
    pub fn query(&self, filter: impl Fn(&T) -> bool, limit: usize) -> Vec<T> {
        let buf = lock_unpoisoned(&self.inner);
        let mut matched: Vec<T> = buf.iter().filter(|e| filter(e)).cloned().collect();
        if matched.len() > limit {
            matched.drain(..matched.len() - limit);
        }
        matched
    }

    /// Number of events currently held (≤ capacity).
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock_unpoisoned(&self.inner).clear();
    }
}

/// A poisoned log mutex only means a producer panicked mid-append; the
/// buffer contents are still whole events, so recover the guard.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn console_event(kind: ConsoleKind, text: &str) -> ConsoleEvent {
        ConsoleEvent {
            ts: Utc::now(),
            kind,
            text: text.to_string(),
            location: None,
            args: Vec::new(),
        }
    }

    #[test]
    fn overflow_drops_oldest() {
        let ring = RingBuffer::new(3);
        for i in 0..5 {
            ring.append(i);
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.query(|_| true, 10), vec![2, 3, 4]);
    }

    #[test]
    fn query_returns_most_recent_in_order() {
        let ring = RingBuffer::new(10);
        for i in 0..6 {
            ring.append(i);
        }
        assert_eq!(ring.query(|_| true, 3), vec![3, 4, 5]);
    }

    #[test]
    fn query_applies_filter_before_limit() {
        let ring = RingBuffer::new(10);
        for i in 0..10 {
            ring.append(i);
        }
        let evens = ring.query(|n| n % 2 == 0, 3);
        assert_eq!(evens, vec![4, 6, 8]);
    }

    #[test]
    fn console_filter_is_a_conjunction() {
        let warn = console_event(ConsoleKind::Warning, "disk nearly full");
        let log = console_event(ConsoleKind::Log, "hello");

        let by_kind = ConsoleFilter {
            kinds: Some(vec!["warning".into(), "error".into()]),
            ..Default::default()
        };
        assert!(by_kind.matches(&warn));
        assert!(!by_kind.matches(&log));

        let by_text = ConsoleFilter {
            contains: Some("DISK".into()),
            ..Default::default()
        };
        assert!(by_text.matches(&warn));
        assert!(!by_text.matches(&log));

        let both = ConsoleFilter {
            kinds: Some(vec!["log".into()]),
            contains: Some("disk".into()),
            ..Default::default()
        };
        assert!(!both.matches(&warn));
    }

    #[test]
    fn console_kind_mapping_is_lenient() {
        assert_eq!(ConsoleKind::from_backend("warning"), ConsoleKind::Warning);
        assert_eq!(ConsoleKind::from_backend("warn"), ConsoleKind::Warning);
        assert_eq!(ConsoleKind::from_backend("table"), ConsoleKind::Log);
    }

    proptest! {
        /// Size never exceeds capacity, and after overflow the buffer holds
        /// exactly the last `capacity` items in order.
        #[test]
        fn capacity_law(capacity in 1usize..64, appends in 0usize..200) {
            let ring = RingBuffer::new(capacity);
            for i in 0..appends {
                ring.append(i);
            }
            prop_assert!(ring.len() <= capacity);
            let contents = ring.query(|_| true, usize::MAX);
            let expected: Vec<usize> =
                (appends.saturating_sub(capacity)..appends).collect();
            prop_assert_eq!(contents, expected);
        }

        /// Queries are ordered subsets of the matching items, of length
        /// at most `limit`.
        #[test]
        fn query_law(appends in 0usize..200, limit in 0usize..50, modulo in 1usize..7) {
            let ring = RingBuffer::new(100);
            for i in 0..appends {
                ring.append(i);
            }
            let result = ring.query(|n| n % modulo == 0, limit);
            prop_assert!(result.len() <= limit);
            prop_assert!(result.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(result.iter().all(|n| n % modulo == 0));
        }
    }
}
