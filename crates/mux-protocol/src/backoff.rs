//! Exponential backoff schedule for Host IPC Client reconnect (§4.D):
//! starts at 100 ms, doubles each attempt, caps at 30 s.

use std::time::Duration;

const INITIAL: Duration = Duration::from_millis(100);
const MAX: Duration = Duration::from_secs(30);

/// Delay before reconnect attempt number `attempt` (0-indexed: the first
/// retry after the initial failed connection is attempt 0).
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let shift = attempt.min(16); // avoid overflow; 100ms << 16 already dwarfs the cap
    let scaled = INITIAL.as_millis().saturating_mul(1u128 << shift);
    let capped = scaled.min(MAX.as_millis());
    Duration::from_millis(capped as u64)
}
