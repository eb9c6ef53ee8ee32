//! Insertion Order Module
//!
//! Tracks key insertion order for FIFO eviction.

use std::collections::VecDeque;

// == Insertion Order ==
/// Tracks insertion order for FIFO eviction.
///
/// Keys are stored in a VecDeque where:
/// - Front = Oldest insertion
/// - Back = Newest insertion
///
/// Each slot carries the sequence number assigned when the key was
/// inserted. Removing a key does not touch the queue; the owner instead
/// reports whether a slot is still live when it is popped, so removal
/// and eviction both stay O(1) amortized.
#[derive(Debug, Default)]
pub struct InsertionOrder {
    /// (sequence, key) pairs in insertion order
    order: VecDeque<(u64, String)>,
    /// Next sequence number to hand out
    next_seq: u64,
}

impl InsertionOrder {
    // == Constructor ==
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Push ==
    /// Records a newly inserted key and returns its sequence number.
    pub fn push(&mut self, key: &str) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((seq, key.to_string()));
        seq
    }

    // == Pop Oldest ==
    /// Removes and returns the oldest live key.
    ///
    /// `is_live(key, seq)` must return true only if `key` is still present
    /// with the given sequence number; stale slots are discarded.
    pub fn pop_oldest<F>(&mut self, mut is_live: F) -> Option<String>
    where
        F: FnMut(&str, u64) -> bool,
    {
        while let Some((seq, key)) = self.order.pop_front() {
            if is_live(&key, seq) {
                return Some(key);
            }
        }
        None
    }

    // == Compact ==
    /// Drops stale slots once they outnumber live entries.
    pub fn compact<F>(&mut self, live_count: usize, mut is_live: F)
    where
        F: FnMut(&str, u64) -> bool,
    {
        if self.order.len() > live_count.saturating_mul(2).max(64) {
            self.order.retain(|(seq, key)| is_live(key, *seq));
        }
    }

    // == Clear ==
    pub fn clear(&mut self) {
        self.order.clear();
    }

    // == Length ==
    /// Returns the number of slots, including stale ones.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_pop_oldest_in_insertion_order() {
        let mut order = InsertionOrder::new();
        let mut live = HashMap::new();

        for key in ["a", "b", "c"] {
            live.insert(key.to_string(), order.push(key));
        }

        let mut check = |k: &str, s: u64| live.get(k) == Some(&s);
        assert_eq!(order.pop_oldest(&mut check), Some("a".to_string()));
        assert_eq!(order.pop_oldest(&mut check), Some("b".to_string()));
        assert_eq!(order.pop_oldest(&mut check), Some("c".to_string()));
        assert_eq!(order.pop_oldest(&mut check), None);
    }

    #[test]
    fn test_pop_skips_removed_keys() {
        let mut order = InsertionOrder::new();
        let mut live = HashMap::new();

        for key in ["a", "b", "c"] {
            live.insert(key.to_string(), order.push(key));
        }
        live.remove("a");

        let evicted = order.pop_oldest(|k, s| live.get(k) == Some(&s));
        assert_eq!(evicted, Some("b".to_string()));
    }

    #[test]
    fn test_reinserted_key_moves_to_back() {
        let mut order = InsertionOrder::new();
        let mut live = HashMap::new();

        live.insert("a".to_string(), order.push("a"));
        live.insert("b".to_string(), order.push("b"));
        // delete then re-insert "a": the old slot becomes stale
        live.insert("a".to_string(), order.push("a"));

        let evicted = order.pop_oldest(|k, s| live.get(k) == Some(&s));
        assert_eq!(evicted, Some("b".to_string()));
    }

    #[test]
    fn test_compact_drops_stale_slots() {
        let mut order = InsertionOrder::new();
        for i in 0..200 {
            order.push(&format!("k{}", i));
        }
        assert_eq!(order.len(), 200);

        // only the last key is still live
        order.compact(1, |k, _| k == "k199");
        assert_eq!(order.len(), 1);
    }
}
