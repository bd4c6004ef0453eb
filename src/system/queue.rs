//! Thread-safe FIFO queue connecting pipeline stages.
//!
//! Producers push (optionally blocking when a soft capacity is
//! reached), the consumer pops blocking, and `shutdown` wakes everyone
//! up. A shut-down queue still yields previously enqueued items before
//! signaling terminal emptiness, so consumers can always drain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// Multi-producer, single-consumer FIFO with blocking operations and a
/// cooperative shutdown signal.
///
/// The capacity is soft and belongs to the push call, not the queue:
/// `push` never blocks, `push_blocking_if_full` blocks the producer
/// while the queue holds at least `capacity` items.
pub struct ThreadsafeQueue<T> {
    name: String,
    deque: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    shutdown: AtomicBool,
}

impl<T> ThreadsafeQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deque: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert at the tail without blocking. Returns false once the
    /// queue is shut down; the item is dropped.
    pub fn push(&self, item: T) -> bool {
        let mut deque = self.deque.lock();
        if self.shutdown.load(Ordering::Acquire) {
            drop(deque);
            debug!(queue = %self.name, "push on shut-down queue rejected");
            return false;
        }
        deque.push_back(item);
        drop(deque);
        self.not_empty.notify_one();
        true
    }

    /// Insert at the tail, blocking the caller while the queue already
    /// holds `capacity` or more items. Returns false only when the
    /// queue is (or becomes) shut down while waiting; the item is
    /// dropped in that case.
    pub fn push_blocking_if_full(&self, item: T, capacity: usize) -> bool {
        let mut deque = self.deque.lock();
        while deque.len() >= capacity && !self.shutdown.load(Ordering::Acquire) {
            self.not_full.wait(&mut deque);
        }
        if self.shutdown.load(Ordering::Acquire) {
            drop(deque);
            debug!(queue = %self.name, "blocking push interrupted by shutdown");
            return false;
        }
        deque.push_back(item);
        drop(deque);
        self.not_empty.notify_one();
        true
    }

    /// Remove and return the head, blocking while the queue is empty
    /// and live. Returns None only when the queue is shut down *and*
    /// empty: the terminal signal for the consumer.
    pub fn pop_blocking(&self) -> Option<T> {
        let mut deque = self.deque.lock();
        loop {
            if let Some(item) = deque.pop_front() {
                drop(deque);
                self.not_full.notify_one();
                return Some(item);
            }
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            self.not_empty.wait(&mut deque);
        }
    }

    /// Non-blocking pop. None means "nothing queued right now", not
    /// necessarily terminal; pair with `is_shutdown` when that matters.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.deque.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    pub fn empty(&self) -> bool {
        self.deque.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.deque.lock().len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Signal shutdown and wake all blocked producers and consumers.
    /// Existing contents stay poppable.
    pub fn shutdown(&self) {
        // Hold the lock while flipping the flag so no waiter can miss
        // the wakeup between its predicate check and its wait.
        let deque = self.deque.lock();
        self.shutdown.store(true, Ordering::Release);
        drop(deque);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        debug!(queue = %self.name, "queue shut down");
    }

    /// Clear the shutdown flag so the queue accepts new work again.
    pub fn resume(&self) {
        let deque = self.deque.lock();
        self.shutdown.store(false, Ordering::Release);
        drop(deque);
        debug!(queue = %self.name, "queue resumed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_fifo_order_preserved() {
        let q = ThreadsafeQueue::new("fifo");
        for i in 0..10 {
            assert!(q.push(i));
        }
        for i in 0..10 {
            assert_eq!(q.pop_blocking(), Some(i));
        }
    }

    #[test]
    fn test_drain_on_shutdown_then_terminal_none() {
        let q = ThreadsafeQueue::new("drain");
        for i in 0..5 {
            assert!(q.push(i));
        }
        q.shutdown();
        // Leftovers come out in order, then the terminal signal.
        for i in 0..5 {
            assert_eq!(q.pop_blocking(), Some(i));
        }
        assert_eq!(q.pop_blocking(), None);
        assert_eq!(q.pop_blocking(), None);
    }

    #[test]
    fn test_push_after_shutdown_rejected() {
        let q = ThreadsafeQueue::new("rejected");
        q.shutdown();
        assert!(!q.push(1));
        assert!(!q.push_blocking_if_full(2, 10));
        assert!(q.empty());
    }

    #[test]
    fn test_blocking_push_respects_capacity() {
        let q = Arc::new(ThreadsafeQueue::new("capacity"));
        assert!(q.push_blocking_if_full(0, 2));
        assert!(q.push_blocking_if_full(1, 2));

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push_blocking_if_full(2, 2))
        };

        // The producer must be blocked: the queue stays at capacity.
        thread::sleep(Duration::from_millis(50));
        assert_eq!(q.len(), 2);

        assert_eq!(q.pop_blocking(), Some(0));
        assert!(producer.join().unwrap());
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_blocking(), Some(1));
        assert_eq!(q.pop_blocking(), Some(2));
    }

    #[test]
    fn test_shutdown_unblocks_blocked_producer() {
        let q = Arc::new(ThreadsafeQueue::new("unblock-push"));
        assert!(q.push_blocking_if_full(0, 1));

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push_blocking_if_full(1, 1))
        };
        thread::sleep(Duration::from_millis(50));
        q.shutdown();
        // Interrupted by shutdown: push fails, item dropped.
        assert!(!producer.join().unwrap());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_shutdown_unblocks_blocked_consumer() {
        let q: Arc<ThreadsafeQueue<i32>> = Arc::new(ThreadsafeQueue::new("unblock-pop"));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop_blocking())
        };
        thread::sleep(Duration::from_millis(50));
        q.shutdown();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_pop_blocking_waits_for_producer() {
        let q = Arc::new(ThreadsafeQueue::new("wait"));
        let start = Instant::now();
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop_blocking())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(q.push(42));
        assert_eq!(consumer.join().unwrap(), Some(42));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_resume_reopens_queue() {
        let q = ThreadsafeQueue::new("resume");
        q.shutdown();
        assert!(!q.push(1));
        q.resume();
        assert!(!q.is_shutdown());
        assert!(q.push(2));
        assert_eq!(q.try_pop(), Some(2));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let q: ThreadsafeQueue<i32> = ThreadsafeQueue::new("idempotent");
        q.shutdown();
        q.shutdown();
        assert!(q.is_shutdown());
        assert_eq!(q.pop_blocking(), None);
    }

    #[test]
    fn test_try_pop_nonblocking() {
        let q: ThreadsafeQueue<i32> = ThreadsafeQueue::new("try");
        assert_eq!(q.try_pop(), None);
        q.push(7);
        assert_eq!(q.try_pop(), Some(7));
        assert_eq!(q.try_pop(), None);
    }
}
