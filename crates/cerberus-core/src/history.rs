// ── Time-windowed metrics history ──
//
// Bounded by age, not count: every insert evicts samples older than the
// newest timestamp minus the retention window.

use std::collections::VecDeque;
use std::time::Duration;

use cerberus_api::protocol::payloads::MetricsRecord;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Anything carrying an epoch-millisecond timestamp.
pub trait Timestamped {
    fn timestamp_ms(&self) -> i64;
}

impl Timestamped for MetricsRecord {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
}

/// Samples ordered by timestamp, covering at most `retention`.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    retention_ms: i64,
    entries: VecDeque<T>,
}

pub type MetricsHistory = SlidingWindow<MetricsRecord>;

impl<T: Timestamped> SlidingWindow<T> {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention_ms: i64::try_from(retention.as_millis()).unwrap_or(i64::MAX),
            entries: VecDeque::new(),
        }
    }

    /// Insert in timestamp order and evict what fell out of the window.
    pub fn insert(&mut self, item: T) {
        let ts = item.timestamp_ms();
        let at = self.entries.partition_point(|e| e.timestamp_ms() <= ts);
        self.entries.insert(at, item);
        self.evict();
    }

    fn evict(&mut self) {
        let Some(newest) = self.entries.back().map(Timestamped::timestamp_ms) else {
            return;
        };
        let cutoff = newest.saturating_sub(self.retention_ms);
        while self
            .entries
            .front()
            .is_some_and(|e| e.timestamp_ms() < cutoff)
        {
            self.entries.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time covered by the oldest and newest samples.
    pub fn span(&self) -> Duration {
        match (self.entries.front(), self.entries.back()) {
            (Some(first), Some(last)) => {
                let ms = last.timestamp_ms().saturating_sub(first.timestamp_ms());
                Duration::from_millis(u64::try_from(ms).unwrap_or(0))
            }
            _ => Duration::ZERO,
        }
    }
}

impl<T: Timestamped> Default for SlidingWindow<T> {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl<T: Timestamped> Extend<T> for SlidingWindow<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.insert(item);
        }
    }
}
