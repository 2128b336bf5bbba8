//! Per-feed point buffer with size bound and TTL eviction.
//!
//! Points are appended in receipt order, so insertion instants are
//! monotonic and expired entries always sit at the front of the ring.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use contracts::FeedPoint;
use ringbuf::{traits::*, HeapRb};
use tokio::time::Instant;

/// Cached point plus its local insertion instant
#[derive(Debug, Clone)]
struct CacheEntry {
    inserted_at: Instant,
    point: Arc<FeedPoint>,
}

impl CacheEntry {
    #[inline]
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) <= ttl
    }
}

/// Bounded ring of the most recent points of one feed
pub struct FeedBuffer {
    ring: HeapRb<CacheEntry>,
    max_points: usize,
    /// Entries pushed out by the size bound
    overflow_count: u64,
    /// Entries removed by the TTL
    expired_count: u64,
}

impl fmt::Debug for FeedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedBuffer")
            .field("len", &self.ring.occupied_len())
            .field("max_points", &self.max_points)
            .field("overflow", &self.overflow_count)
            .field("expired", &self.expired_count)
            .finish()
    }
}

impl FeedBuffer {
    /// Create an empty buffer holding at most `max_points` entries
    pub fn new(max_points: usize) -> Self {
        let max_points = max_points.max(1);
        Self {
            ring: HeapRb::new(max_points),
            max_points,
            overflow_count: 0,
            expired_count: 0,
        }
    }

    /// Append a point, evicting the oldest entry when full
    pub fn push(&mut self, point: Arc<FeedPoint>, now: Instant) {
        if self.ring.is_full() {
            let _ = self.ring.try_pop();
            self.overflow_count += 1;
        }
        let _ = self.ring.try_push(CacheEntry {
            inserted_at: now,
            point,
        });
    }

    /// Drop entries older than `ttl`; returns how many were removed
    pub fn evict_expired(&mut self, now: Instant, ttl: Duration) -> usize {
        let mut evicted = 0;
        while self
            .ring
            .iter()
            .next()
            .is_some_and(|entry| !entry.is_fresh(now, ttl))
        {
            let _ = self.ring.try_pop();
            evicted += 1;
        }
        self.expired_count += evicted as u64;
        evicted
    }

    /// Non-expired points, oldest first
    pub fn points(&self, now: Instant, ttl: Duration) -> Vec<Arc<FeedPoint>> {
        self.ring
            .iter()
            .filter(|entry| entry.is_fresh(now, ttl))
            .map(|entry| Arc::clone(&entry.point))
            .collect()
    }

    /// Most recent non-expired point
    pub fn latest(&self, now: Instant, ttl: Duration) -> Option<Arc<FeedPoint>> {
        self.ring
            .iter()
            .last()
            .filter(|entry| entry.is_fresh(now, ttl))
            .map(|entry| Arc::clone(&entry.point))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn expired_count(&self) -> u64 {
        self.expired_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn point(i: i64) -> Arc<FeedPoint> {
        let mut values = Map::new();
        values.insert("demand_mw".into(), i.into());
        Arc::new(FeedPoint {
            timestamp: Utc::now(),
            feed_name: "grid".into(),
            source_id: "ieso".into(),
            values,
            metadata: None,
        })
    }

    fn value(p: &FeedPoint) -> i64 {
        p.values["demand_mw"].as_i64().unwrap()
    }

    #[test]
    fn test_size_bound_evicts_oldest() {
        let mut buf = FeedBuffer::new(3);
        let now = Instant::now();
        for i in 0..5 {
            buf.push(point(i), now);
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.overflow_count(), 2);

        let values: Vec<i64> = buf
            .points(now, Duration::from_secs(60))
            .iter()
            .map(|p| value(p))
            .collect();
        assert_eq!(values, vec![2, 3, 4]);
    }

    #[test]
    fn test_ttl_filters_reads_before_sweep() {
        let mut buf = FeedBuffer::new(10);
        let t0 = Instant::now();
        buf.push(point(1), t0);
        buf.push(point(2), t0 + Duration::from_secs(30));

        let ttl = Duration::from_secs(60);
        let later = t0 + Duration::from_secs(70);
        let fresh = buf.points(later, ttl);
        assert_eq!(fresh.len(), 1);
        assert_eq!(value(&fresh[0]), 2);
        // not swept yet
        assert_eq!(buf.len(), 2);

        assert_eq!(buf.evict_expired(later, ttl), 1);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.expired_count(), 1);
    }

    #[test]
    fn test_latest() {
        let mut buf = FeedBuffer::new(4);
        let now = Instant::now();
        assert!(buf.latest(now, Duration::from_secs(1)).is_none());

        buf.push(point(7), now);
        buf.push(point(8), now);
        assert_eq!(value(&buf.latest(now, Duration::from_secs(1)).unwrap()), 8);
        assert!(buf
            .latest(now + Duration::from_secs(2), Duration::from_secs(1))
            .is_none());
    }
}
