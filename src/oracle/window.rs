//! Rolling window (spec.md §4.7, shared by both estimators in component C7).
//!
//! The live estimator evicts by wall-clock age; the baseline estimator
//! evicts by block height. Both are FIFO-ordered, so eviction never
//! needs to scan past the oldest surviving entry.

use std::collections::VecDeque;

/// One entry in a [`RollingWindow`]: the processed amounts it
/// contributed plus the key used to decide eviction.
pub struct WindowEntry<T> {
    pub key: i64,
    pub value: T,
}

/// A FIFO-ordered window keyed by either wall-clock seconds or block
/// height, evicting everything older than a configurable span relative
/// to the newest key seen so far.
pub struct RollingWindow<T> {
    entries: VecDeque<WindowEntry<T>>,
    span: i64,
    newest_key: i64,
}

impl<T> RollingWindow<T> {
    /// `span` is both the window's capacity in distinct keys and the
    /// eviction threshold: an entry survives while `newest_key - key <
    /// span`, so a window fed one entry per consecutive key holds
    /// exactly `min(span, keys_seen)` entries at any point (spec.md §8:
    /// "the rolling window size is min(144, h+1)").
    pub fn new(span: i64) -> Self {
        Self {
            entries: VecDeque::new(),
            span,
            newest_key: i64::MIN,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn newest_key(&self) -> i64 {
        self.newest_key
    }

    /// Pushes a new entry and evicts anything that has fallen outside
    /// the span, returning the evicted entries so the caller can
    /// subtract their contribution from a running accumulator (e.g. the
    /// histogram).
    pub fn push(&mut self, key: i64, value: T) -> Vec<WindowEntry<T>> {
        if key > self.newest_key {
            self.newest_key = key;
        }
        self.entries.push_back(WindowEntry { key, value });
        self.evict()
    }

    /// Re-runs eviction against the current `newest_key` without adding
    /// a new entry (used by the live estimator's periodic tick, since
    /// wall-clock age advances even without new transactions arriving).
    pub fn evict_to(&mut self, newest_key: i64) -> Vec<WindowEntry<T>> {
        if newest_key > self.newest_key {
            self.newest_key = newest_key;
        }
        self.evict()
    }

    fn evict(&mut self) -> Vec<WindowEntry<T>> {
        let mut evicted = Vec::new();
        while let Some(front) = self.entries.front() {
            if self.newest_key - front.key >= self.span {
                evicted.push(self.entries.pop_front().unwrap());
            } else {
                break;
            }
        }
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &WindowEntry<T>> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_entries_older_than_span() {
        let mut w: RollingWindow<u32> = RollingWindow::new(100);
        w.push(0, 1);
        w.push(50, 2);
        let evicted = w.push(99, 3);
        assert!(evicted.is_empty(), "age 99 is still under the span of 100");
        assert_eq!(w.len(), 3);

        let evicted = w.push(150, 4);
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].key, 0);
        assert_eq!(evicted[1].key, 50);
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn window_size_matches_min_span_and_keys_seen_invariant() {
        // spec.md §8: "the rolling window size is min(144, h+1)".
        let mut w: RollingWindow<i64> = RollingWindow::new(144);
        for h in 0..300i64 {
            w.push(h, h);
            assert_eq!(w.len(), (h + 1).min(144) as usize, "mismatch at height {h}");
        }
    }

    #[test]
    fn evict_to_ages_out_entries_without_a_new_push() {
        let mut w: RollingWindow<u32> = RollingWindow::new(100);
        w.push(0, 1);
        w.push(10, 2);
        let evicted = w.evict_to(120);
        assert_eq!(evicted.len(), 2);
        assert!(w.is_empty());
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut w: RollingWindow<u32> = RollingWindow::new(1000);
        for i in 0..5 {
            w.push(i, i as u32);
        }
        let keys: Vec<i64> = w.iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    }
}
