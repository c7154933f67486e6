//! Simple token bucket, used to rate-limit `BufferRequest` per (viewer,
//! session) pair (§9 open question, resolved: burst 4, refill 1/s).

use std::time::{Duration, Instant};

pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Attempt to take one token. Returns `true` if allowed.
    pub fn try_take(&mut self) -> bool {
        self.try_take_at(Instant::now())
    }

    fn try_take_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_burst_capacity() {
        let mut bucket = TokenBucket::new(4, 1.0);
        for _ in 0..4 {
            assert!(bucket.try_take());
        }
        assert!(!bucket.try_take());
    }

    #[test]
    fn refills_over_time() {
        let mut bucket = TokenBucket::new(1, 10.0);
        assert!(bucket.try_take());
        assert!(!bucket.try_take());
        std::thread::sleep(Duration::from_millis(150));
        assert!(bucket.try_take());
    }
}
