//! Bounded, drop-oldest output queue (§4.G, capacity `Q`). A plain
//! `tokio::sync::mpsc` channel blocks a full sender instead of dropping, so
//! this is a small `Notify`-driven deque instead — the producer never
//! waits, which is the point of a drop-oldest policy.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

pub struct OutputQueue {
    inner: Mutex<VecDeque<Vec<u8>>>,
    capacity: usize,
    notify: Notify,
}

impl OutputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Pushes a frame, dropping the oldest queued frame if already full.
    /// Returns `true` when a drop occurred.
    pub fn push(&self, frame: Vec<u8>) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let dropped = if guard.len() >= self.capacity {
            guard.pop_front();
            true
        } else {
            false
        };
        guard.push_back(frame);
        drop(guard);
        self.notify.notify_one();
        dropped
    }

    /// Drops everything currently queued; used by resync (§4.G.2 step 1).
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub async fn pop(&self) -> Vec<u8> {
        loop {
            if let Some(frame) = self.inner.lock().unwrap().pop_front() {
                return frame;
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_on_overflow() {
        let q = OutputQueue::new(2);
        assert!(!q.push(vec![1]));
        assert!(!q.push(vec![2]));
        assert!(q.push(vec![3]));
        assert_eq!(q.inner.lock().unwrap().clone(), VecDeque::from([vec![2], vec![3]]));
    }
}
