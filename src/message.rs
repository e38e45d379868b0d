//! Work item passed from producers to consumers.

use crate::priority::Priority;
use std::fmt;
use std::time::{Duration, Instant};

/// Identity of the worker that created a message.
pub type SourceId = u32;

/// Immutable unit of work travelling through the queue.
///
/// `created_at` is a monotonic timestamp taken when the message is built; it drives both the
/// FIFO tie-break inside a priority class and the aging boost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    payload: i64,
    priority: Priority,
    source: SourceId,
    created_at: Instant,
}

impl Message {
    /// Create a message stamped with the current instant.
    pub fn new(payload: i64, priority: Priority, source: SourceId) -> Message {
        Message::with_timestamp(payload, priority, source, Instant::now())
    }

    /// Create a message with an explicit creation instant.
    pub fn with_timestamp(
        payload: i64,
        priority: Priority,
        source: SourceId,
        created_at: Instant,
    ) -> Message {
        Message {
            payload,
            priority,
            source,
            created_at,
        }
    }

    pub fn payload(&self) -> i64 {
        self.payload
    }

    /// Base priority assigned at creation.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since creation, or `None` if `now` precedes the creation instant.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        now.checked_duration_since(self.created_at)
    }

    /// Priority after applying the aging boost at `now`.
    pub fn effective_priority(&self, now: Instant, aging_interval: Duration) -> Priority {
        let waited = self.age(now).unwrap_or(Duration::ZERO);
        self.priority.effective(waited, aging_interval)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P{} pri={} data={}",
            self.source, self.priority, self.payload
        )
    }
}
