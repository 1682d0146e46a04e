//! Bounded blocking deque used by the log writer pipeline.
//!
//! Two condition variables separate producer and consumer waiters, same
//! shape as a mutex + deque blocking queue. Unlike the textbook version,
//! insertion is tail-only (`push`/`try_push`) and the timed pop's
//! success path is structured so a spurious wakeup always retries instead
//! of silently falling through with no return.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

struct State<T> {
    deque: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        BlockingQueue {
            state: Mutex::new(State {
                deque: VecDeque::new(),
                capacity,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues `item`, blocking while the queue is full. Returns `Err(item)`
    /// without blocking if the queue is closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut st = self.state.lock().unwrap();
        while st.deque.len() >= st.capacity && !st.closed {
            st = self.not_full.wait(st).unwrap();
        }
        if st.closed {
            return Err(item);
        }
        st.deque.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Non-blocking insert. Fails if the queue is at capacity or closed,
    /// returning the item back to the caller.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut st = self.state.lock().unwrap();
        if st.closed || st.deque.len() >= st.capacity {
            return Err(item);
        }
        st.deque.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available or the queue is closed and
    /// drained, in which case it returns `None`.
    pub fn pop(&self) -> Option<T> {
        let mut st = self.state.lock().unwrap();
        loop {
            if let Some(item) = st.deque.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if st.closed {
                return None;
            }
            st = self.not_empty.wait(st).unwrap();
        }
    }

    /// Waits up to `timeout` for an item. On timeout returns `None`; on a
    /// spurious wakeup with nothing queued it keeps waiting out the
    /// remaining budget instead of returning prematurely.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock().unwrap();
        loop {
            if let Some(item) = st.deque.pop_front() {
                self.not_full.notify_one();
                return Some(item);
            }
            if st.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, timeout_result) = self.not_empty.wait_timeout(st, remaining).unwrap();
            st = guard;
            if timeout_result.timed_out() && st.deque.is_empty() {
                return None;
            }
        }
    }

    pub fn close(&self) {
        let mut st = self.state.lock().unwrap();
        st.closed = true;
        drop(st);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().deque.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_round_trips() {
        let q = BlockingQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn try_push_fails_when_full() {
        let q = BlockingQueue::new(1);
        q.try_push(1).unwrap();
        assert_eq!(q.try_push(2), Err(2));
    }

    #[test]
    fn pop_timeout_returns_none_on_empty() {
        let q: BlockingQueue<i32> = BlockingQueue::new(4);
        assert_eq!(q.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn close_unblocks_waiting_consumer() {
        let q = Arc::new(BlockingQueue::<i32>::new(4));
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop());
        thread::sleep(Duration::from_millis(20));
        q.close();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn pending_producer_unblocks_after_consumer_drains() {
        let q = Arc::new(BlockingQueue::<i32>::new(1));
        q.push(1).unwrap();
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.push(2));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(q.pop(), Some(1));
        handle.join().unwrap().unwrap();
        assert_eq!(q.pop(), Some(2));
    }
}
