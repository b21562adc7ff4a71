//! Exponential backoff with jitter, and deadline arithmetic.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::{Jitter, RetryConfig};

/// Un-jittered delay before retry number `attempt` (1-based).
///
/// `min(initial × multiplier^(attempt−1), max)`; attempt 0 yields zero.
pub fn base_delay(attempt: u32, config: &RetryConfig) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let factor = config.backoff_multiplier.max(1.0).powi(exponent);
    let delay_ms = config.initial_delay_ms as f64 * factor;
    let capped_ms = if delay_ms.is_finite() {
        delay_ms.min(config.max_delay_ms as f64)
    } else {
        config.max_delay_ms as f64
    };

    Duration::from_millis(capped_ms as u64)
}

/// Calculate the delay before retry number `attempt`, jitter included.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    apply_jitter(base_delay(attempt, config), config.jitter)
}

/// Randomize `delay` according to `jitter`. Never exceeds `delay`.
pub fn apply_jitter(delay: Duration, jitter: Jitter) -> Duration {
    let delay_ms = delay.as_millis() as u64;
    if delay_ms == 0 {
        return delay;
    }

    match jitter {
        Jitter::None => delay,
        Jitter::Full => Duration::from_millis(rand::thread_rng().gen_range(0..=delay_ms)),
        Jitter::Equal => {
            let half = delay_ms / 2;
            Duration::from_millis(rand::thread_rng().gen_range(half..=delay_ms))
        }
    }
}

/// Roughly 30 years; the cap for deadlines that would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `start + wait`, saturating to a far-future instant instead of panicking.
pub fn deadline_after(start: Instant, wait: Duration) -> Instant {
    start.checked_add(wait).unwrap_or_else(|| start + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, max_ms: u64, multiplier: f64, jitter: Jitter) -> RetryConfig {
        RetryConfig {
            max_attempts: 10,
            initial_delay_ms: initial_ms,
            max_delay_ms: max_ms,
            backoff_multiplier: multiplier,
            jitter,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let cfg = config(100, 1000, 2.0, Jitter::None);
        assert_eq!(calculate_backoff(1, &cfg), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, &cfg), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, &cfg), Duration::from_millis(400));
        assert_eq!(calculate_backoff(5, &cfg), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(60, &cfg), Duration::from_millis(1000));
    }

    #[test]
    fn test_fractional_multiplier() {
        let cfg = config(100, 10_000, 1.5, Jitter::None);
        assert_eq!(base_delay(2, &cfg), Duration::from_millis(150));
        assert_eq!(base_delay(3, &cfg), Duration::from_millis(225));
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(400);
        for _ in 0..200 {
            let full = apply_jitter(delay, Jitter::Full);
            assert!(full <= delay);

            let equal = apply_jitter(delay, Jitter::Equal);
            assert!(equal >= Duration::from_millis(200) && equal <= delay);
        }
        assert_eq!(apply_jitter(Duration::ZERO, Jitter::Full), Duration::ZERO);
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(deadline_after(now, Duration::from_secs(u64::MAX / 2)), now + FAR_FUTURE);
    }
}
