//! Bounded, lossy FIFO queues used between tasks.
//!
//! Pushes never wait. When a queue is full the new item is dropped, the
//! shared overflow counter is bumped, and a warning is logged; items already
//! queued are untouched and still come out in order.
//!
//! Pops come in two flavours: [`LossyQueue::try_pop`] for polling loops and
//! [`LossyQueue::pop_timeout`] for the ack wait.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use lorahome_dongle::queue::LossyQueue;
//!
//! let overflow = Arc::new(AtomicU64::new(0));
//! let queue = LossyQueue::new("example", 2, overflow.clone());
//!
//! assert!(queue.push(1));
//! assert!(queue.push(2));
//! assert!(!queue.push(3));
//! assert_eq!(overflow.load(Ordering::Relaxed), 1);
//! assert_eq!(queue.try_pop(), Some(1));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

/// A named, bounded queue with drop-on-full semantics.
///
/// Any number of producers may push concurrently. Consumers are serialized
/// through an internal lock, so each item is delivered exactly once.
#[derive(Debug)]
pub struct LossyQueue<T> {
    /// Name used in log messages.
    name: &'static str,
    /// Producer side.
    tx: mpsc::Sender<T>,
    /// Consumer side.
    rx: Mutex<mpsc::Receiver<T>>,
    /// Shared count of items dropped on full.
    overflow: Arc<AtomicU64>,
}

impl<T> LossyQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(name: &'static str, capacity: usize, overflow: Arc<AtomicU64>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
            overflow,
        }
    }

    /// Enqueue without waiting.
    ///
    /// Returns `false` if the item was dropped because the queue is full.
    pub fn push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("{} queue full, dropping item", self.name);
                false
            }
            // The receiver lives as long as self
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Dequeue without waiting.
    ///
    /// Returns `None` when the queue is empty or another consumer is
    /// currently waiting on it.
    pub fn try_pop(&self) -> Option<T> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Dequeue, waiting up to `timeout` for an item.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Number of queued items.
    #[inline]
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether the queue holds no items.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize) -> (LossyQueue<u32>, Arc<AtomicU64>) {
        let overflow = Arc::new(AtomicU64::new(0));
        (LossyQueue::new("test", capacity, overflow.clone()), overflow)
    }

    #[test]
    fn test_push_pop_fifo() {
        let (q, _) = queue(4);
        for i in 0..4 {
            assert!(q.push(i));
        }
        assert_eq!(q.len(), 4);
        for i in 0..4 {
            assert_eq!(q.try_pop(), Some(i));
        }
        assert!(q.is_empty());
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_overflow_keeps_existing_items() {
        let (q, overflow) = queue(3);
        for i in 0..3 {
            q.push(i);
        }
        assert!(!q.push(99));
        assert!(!q.push(100));
        assert_eq!(overflow.load(Ordering::Relaxed), 2);

        assert_eq!(q.try_pop(), Some(0));
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_space_frees_after_pop() {
        let (q, _) = queue(1);
        assert!(q.push(1));
        assert!(!q.push(2));
        assert_eq!(q.try_pop(), Some(1));
        assert!(q.push(3));
        assert_eq!(q.capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout_expires() {
        let (q, _) = queue(2);
        let start = tokio::time::Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(300)).await, None);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout_wakes_on_push() {
        let overflow = Arc::new(AtomicU64::new(0));
        let q = Arc::new(LossyQueue::new("test", 2, overflow));

        let producer = q.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer.push(7u32);
        });

        assert_eq!(q.pop_timeout(Duration::from_millis(300)).await, Some(7));
    }
}
