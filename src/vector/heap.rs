//! Capacity-bounded max-heap used for top-K selection.
//!
//! The heap keeps the `K` entries with the smallest distances seen so far. The
//! root is always the current worst entry, so a full heap decides in O(1)
//! whether a new candidate can enter.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry ordered by distance, then by arrival. Among equal distances
/// the latest arrival is the worst, so it is the one evicted.
#[derive(Debug, Clone)]
struct Entry<T> {
    distance: f64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Keeps the `capacity` nearest items.
#[derive(Debug, Clone)]
pub struct BoundedMaxHeap<T> {
    capacity: usize,
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> BoundedMaxHeap<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1)),
            next_seq: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Distance of the current worst entry.
    #[must_use]
    pub fn worst_distance(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.distance)
    }

    /// Offers an item. Returns whether it was kept.
    ///
    /// While the heap has room every item is kept. Once full, the worst entry
    /// is replaced only by a strictly smaller distance, so earlier items win
    /// ties. When several entries share the worst distance, the latest of
    /// them is the one replaced.
    pub fn push(&mut self, distance: f64, item: T) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let entry = Entry {
            distance,
            seq: self.next_seq,
            item,
        };
        if !self.is_full() {
            self.next_seq += 1;
            self.heap.push(entry);
            return true;
        }
        match self.heap.peek() {
            Some(worst) if distance < worst.distance => {
                self.next_seq += 1;
                self.heap.pop();
                self.heap.push(entry);
                true
            }
            _ => false,
        }
    }

    /// Drains the heap in no particular order.
    pub fn into_unordered(self) -> Vec<(f64, T)> {
        self.heap
            .into_vec()
            .into_iter()
            .map(|e| (e.distance, e.item))
            .collect()
    }

    /// Drains the heap, nearest first; equal distances keep arrival order.
    pub fn into_sorted(self) -> Vec<(f64, T)> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| (e.distance, e.item))
            .collect()
    }
}
