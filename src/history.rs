//! Bounded cache of recently resolved crash points.
//!
//! Display-only: the round store is authoritative and the cache is reseeded
//! from it on startup. Ordered oldest first, most recent last.

use rust_decimal::Decimal;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct HistoryCache {
    capacity: usize,
    entries: VecDeque<Decimal>,
}

impl HistoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Seed from store history (oldest first); keeps only the newest `capacity`
    pub fn seeded(capacity: usize, crash_points: impl IntoIterator<Item = Decimal>) -> Self {
        let mut cache = Self::new(capacity);
        for crash_point in crash_points {
            cache.push(crash_point);
        }
        cache
    }

    /// Append a resolved crash point, evicting the oldest past capacity
    pub fn push(&mut self, crash_point: Decimal) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(crash_point);
    }

    pub fn snapshot(&self) -> Vec<Decimal> {
        self.entries.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<Decimal> {
        self.entries.back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(hundredths: i64) -> Decimal {
        Decimal::new(hundredths, 2)
    }

    #[test]
    fn test_keeps_most_recent_twenty_of_twenty_five() {
        let mut cache = HistoryCache::new(20);
        for i in 1..=25 {
            cache.push(point(100 + i));
        }

        let expected: Vec<Decimal> = (6..=25).map(|i| point(100 + i)).collect();
        assert_eq!(cache.len(), 20);
        assert_eq!(cache.snapshot(), expected);
        assert_eq!(cache.latest(), Some(point(125)));
    }

    #[test]
    fn test_seeding_truncates_to_capacity() {
        let cache = HistoryCache::seeded(3, (1..=5).map(|i| point(100 * i)));
        assert_eq!(cache.snapshot(), vec![point(300), point(400), point(500)]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = HistoryCache::new(0);
        cache.push(point(150));
        cache.push(point(250));
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.snapshot(), vec![point(250)]);
    }
}
