//! Min-heap timer wheel keyed by deadline, indexed by connection id (fd).
//!
//! A vector-backed binary heap plus an `id -> heap index` map gives O(log n)
//! insert, adjust and erase-by-id, which a plain `BinaryHeap` cannot do
//! since it has no way to locate an arbitrary element to update in place.

use std::collections::HashMap;
use std::time::{Duration, Instant};

pub type ExpireCallback = Box<dyn FnMut() + Send>;

struct TimerNode {
    id: i32,
    expires: Instant,
    cb: ExpireCallback,
}

pub struct TimingHeap {
    heap: Vec<TimerNode>,
    index: HashMap<i32, usize>,
}

impl Default for TimingHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingHeap {
    pub fn new() -> Self {
        TimingHeap {
            heap: Vec::with_capacity(64),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn add(&mut self, id: i32, timeout_ms: u64, cb: ExpireCallback) {
        match self.index.get(&id).copied() {
            None => {
                let i = self.heap.len();
                self.index.insert(id, i);
                self.heap.push(TimerNode {
                    id,
                    expires: Instant::now() + Duration::from_millis(timeout_ms),
                    cb,
                });
                self.sift_up(i);
            }
            Some(i) => {
                self.heap[i].expires = Instant::now() + Duration::from_millis(timeout_ms);
                self.heap[i].cb = cb;
                let n = self.heap.len();
                if !self.sift_down(i, n) {
                    self.sift_up(i);
                }
            }
        }
    }

    pub fn adjust(&mut self, id: i32, timeout_ms: u64) {
        let Some(&i) = self.index.get(&id) else {
            return;
        };
        self.heap[i].expires = Instant::now() + Duration::from_millis(timeout_ms);
        let n = self.heap.len();
        self.sift_down(i, n);
    }

    /// Removes `id` and runs its callback first, mirroring `doWork` in the
    /// reference implementation.
    pub fn do_work(&mut self, id: i32) {
        let Some(&i) = self.index.get(&id) else {
            return;
        };
        if self.heap.is_empty() {
            return;
        }
        (self.heap[i].cb)();
        self.del(i);
    }

    /// Removes `id` without invoking its callback.
    pub fn erase(&mut self, id: i32) {
        if let Some(&i) = self.index.get(&id) {
            self.del(i);
        }
    }

    fn del(&mut self, index: usize) {
        let n = self.heap.len() - 1;
        if index < n {
            self.swap_node(index, n);
            if !self.sift_down(index, n) {
                self.sift_up(index);
            }
        }
        if let Some(last) = self.heap.pop() {
            self.index.remove(&last.id);
        }
    }

    /// Runs every callback whose deadline has passed.
    pub fn tick(&mut self) {
        while let Some(node) = self.heap.first_mut() {
            if node.expires > Instant::now() {
                break;
            }
            (node.cb)();
            self.pop();
        }
    }

    pub fn pop(&mut self) {
        if !self.heap.is_empty() {
            self.del(0);
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.index.clear();
    }

    /// Ticks off expired entries, then returns the number of milliseconds
    /// until the next deadline, or `-1` if no timers remain.
    pub fn next_tick_ms(&mut self) -> i64 {
        self.tick();
        match self.heap.first() {
            None => -1,
            Some(node) => {
                let now = Instant::now();
                if node.expires <= now {
                    0
                } else {
                    (node.expires - now).as_millis() as i64
                }
            }
        }
    }

    fn swap_node(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id, i);
        self.index.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, i: usize) {
        let mut i = i;
        while i > 0 {
            let j = (i - 1) / 2;
            if self.heap[j].expires <= self.heap[i].expires {
                break;
            }
            self.swap_node(i, j);
            i = j;
        }
    }

    /// Returns `true` if the node moved to a strictly greater index.
    fn sift_down(&mut self, index: usize, n: usize) -> bool {
        let mut i = index;
        let mut j = i * 2 + 1;
        while j < n {
            if j + 1 < n && self.heap[j + 1].expires < self.heap[j].expires {
                j += 1;
            }
            if self.heap[i].expires <= self.heap[j].expires {
                break;
            }
            self.swap_node(i, j);
            i = j;
            j = i * 2 + 1;
        }
        i > index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn next_tick_within_bounds_after_adjust() {
        let mut heap = TimingHeap::new();
        heap.add(1, 1000, Box::new(|| {}));
        heap.add(2, 50, Box::new(|| {}));
        heap.adjust(1, 10);
        let t = heap.next_tick_ms();
        assert!((0..=50).contains(&t));
    }

    #[test]
    fn heap_property_holds_after_many_inserts() {
        let mut heap = TimingHeap::new();
        for id in 0..50 {
            heap.add(id, (50 - id) as u64 * 3, Box::new(|| {}));
        }
        for i in 1..heap.heap.len() {
            let parent = (i - 1) / 2;
            assert!(heap.heap[parent].expires <= heap.heap[i].expires);
        }
        for (id, &i) in heap.index.iter() {
            assert_eq!(heap.heap[i].id, *id);
        }
    }

    #[test]
    fn expired_entry_fires_callback_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let mut heap = TimingHeap::new();
        heap.add(7, 0, Box::new(move || { f.fetch_add(1, Ordering::SeqCst); }));
        std::thread::sleep(Duration::from_millis(5));
        heap.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(heap.is_empty());
    }

    #[test]
    fn erase_removes_entry_without_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        let mut heap = TimingHeap::new();
        heap.add(3, 0, Box::new(move || { f.fetch_add(1, Ordering::SeqCst); }));
        heap.erase(3);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(heap.is_empty());
    }

    #[test]
    fn unrelated_entries_unaffected_by_adjust() {
        let mut heap = TimingHeap::new();
        heap.add(1, 500, Box::new(|| {}));
        heap.add(2, 10_000, Box::new(|| {}));
        heap.adjust(1, 5);
        assert!(heap.index.contains_key(&2));
        let i2 = heap.index[&2];
        assert!(heap.heap[i2].expires > Instant::now() + Duration::from_secs(5));
    }
}
