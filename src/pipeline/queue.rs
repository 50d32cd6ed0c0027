use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

use crate::packet::PacketRecord;

/// Fixed-capacity FIFO between the capture workers and the consumer.
///
/// Cloning yields another handle onto the same queue.
#[derive(Clone)]
pub struct PacketQueue {
    tx: Sender<PacketRecord>,
    rx: Receiver<PacketRecord>,
    capacity: usize,
}

impl PacketQueue {
    /// `capacity` must be non-zero; a zero-capacity channel would be a rendezvous
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = channel::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Enqueue without blocking; `false` means the queue was full and the record is gone
    pub fn try_push(&self, record: PacketRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Wait up to `timeout` for the next record
    pub fn pop(&self, timeout: Duration) -> Option<PacketRecord> {
        match self.rx.recv_timeout(timeout) {
            Ok(record) => Some(record),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::tests::record_at;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_push_refuses_exactly_at_capacity() {
        let queue = PacketQueue::new(3);
        for t in 0..3 {
            assert!(!queue.is_full());
            assert!(queue.try_push(record_at(t)));
        }
        assert!(queue.is_full());
        assert!(!queue.try_push(record_at(3)));
        assert_eq!(queue.len(), 3);

        queue.pop(Duration::from_millis(10)).unwrap();
        assert!(queue.try_push(record_at(4)));
    }

    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::new(4);
        for t in [7, 3, 9] {
            queue.try_push(record_at(t));
        }
        let order: Vec<i64> = std::iter::from_fn(|| queue.pop(Duration::from_millis(5)))
            .map(|r| r.timestamp().timestamp())
            .collect();
        assert_eq!(order, vec![7, 3, 9]);
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = PacketQueue::new(1);
        let started = Instant::now();
        assert!(queue.pop(Duration::from_millis(20)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_two_drops_third() {
        // Consumer paused: nobody pops
        let queue = PacketQueue::new(2);
        let results: Vec<bool> = (1..=3).map(|t| queue.try_push(record_at(t))).collect();
        assert_eq!(results, vec![true, true, false]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn test_many_producers_never_exceed_capacity() {
        let queue = PacketQueue::new(16);
        let accepted = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let accepted = accepted.clone();
                thread::spawn(move || {
                    for t in 0..100 {
                        if queue.try_push(record_at(t)) {
                            accepted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        assert_eq!(accepted.load(Ordering::Relaxed), 16);
        assert_eq!(queue.len(), 16);
    }
}
