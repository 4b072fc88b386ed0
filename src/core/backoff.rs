//! Capped exponential backoff with jitter, shared by credential refresh and
//! probe retry (spec §4.1, §4.3): `delay_n = min(base * 2^(n-1) * jitter, cap)`.

use std::time::Duration;

const BASE_MS: u64 = 500;
const CAP_MS: u64 = 8_000;

/// Delay to sleep before retry attempt number `attempt` (1-indexed).
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let exp = BASE_MS.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let jitter = fastrand::f64() * 0.4 + 0.8; // [0.8, 1.2)
    let delay_ms = (exp.min(CAP_MS) as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}
