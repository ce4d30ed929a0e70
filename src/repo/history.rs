use parking_lot::RwLock;
use std::collections::VecDeque;

use crate::domain::Sample;

struct History {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl History {
    fn evict_overflow(&mut self) {
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }
}

/// Bounded in-memory sample history.
///
/// The poll loop is the only writer. Readers take a [`snapshot`](Self::snapshot)
/// and work on the copy, so no query holds the lock while it filters or aggregates.
pub struct HistoryStore {
    inner: RwLock<History>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: RwLock::new(History {
                samples: VecDeque::with_capacity(capacity.min(4096)),
                capacity,
            }),
        }
    }

    /// Append at the tail, evicting the oldest samples past capacity
    pub fn append(&self, sample: Sample) {
        let mut history = self.inner.write();
        history.samples.push_back(sample);
        history.evict_overflow();
    }

    /// Point-in-time copy, oldest first
    pub fn snapshot(&self) -> Vec<Sample> {
        self.inner.read().samples.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<Sample> {
        self.inner.read().samples.back().cloned()
    }

    /// Newest sample, or the disconnected placeholder while empty
    pub fn latest(&self) -> Sample {
        self.last().unwrap_or_else(Sample::disconnected)
    }

    /// Change capacity; shrinking evicts the oldest samples immediately
    pub fn resize(&self, capacity: usize) {
        let mut history = self.inner.write();
        history.capacity = capacity.max(1);
        history.evict_overflow();
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use std::sync::Arc;

    fn sample(seconds: i64) -> Sample {
        let base = DateTime::parse_from_rfc3339("2025-11-26T00:00:00+00:00").unwrap();
        Sample {
            timestamp: base + Duration::seconds(seconds),
            solar_kw: seconds as f64,
            connected: true,
            ..Sample::disconnected()
        }
    }

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let store = HistoryStore::new(3);
        for i in 0..4 {
            store.append(sample(i));
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0], sample(1));
        assert_eq!(store.latest(), sample(3));
    }

    #[test]
    fn test_latest_on_empty_store_is_disconnected() {
        let store = HistoryStore::new(10);
        assert!(store.is_empty());
        assert!(!store.latest().connected);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = HistoryStore::new(10);
        store.append(sample(0));
        let snapshot = store.snapshot();
        store.append(sample(1));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_resize_shrinks_immediately() {
        let store = HistoryStore::new(5);
        for i in 0..5 {
            store.append(sample(i));
        }
        store.resize(2);

        assert_eq!(store.capacity(), 2);
        assert_eq!(store.snapshot(), vec![sample(3), sample(4)]);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let store = HistoryStore::new(0);
        store.append(sample(0));
        store.append(sample(1));
        assert_eq!(store.snapshot(), vec![sample(1)]);
    }

    #[test]
    fn test_concurrent_readers_see_whole_appends() {
        let store = Arc::new(HistoryStore::new(50));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.snapshot();
                        assert!(snapshot.len() <= 50);
                        assert!(snapshot
                            .windows(2)
                            .all(|pair| pair[0].timestamp < pair[1].timestamp));
                    }
                })
            })
            .collect();

        for i in 0..1_000 {
            store.append(sample(i));
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.len(), 50);
        assert_eq!(store.latest(), sample(999));
    }
}
