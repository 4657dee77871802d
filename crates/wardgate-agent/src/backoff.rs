//! Cubic reconnect backoff

use std::time::Duration;

pub const DEFAULT_BASE: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX: Duration = Duration::from_secs(30);

/// Wait before attempt `n` is `base * n³`, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_MAX)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Count one more failed attempt and return how long to wait before the next
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let factor = self.attempt.saturating_pow(3);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_cubically() {
        let mut backoff = Backoff::default();
        let delays: Vec<Duration> = (0..4).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(10),
                Duration::from_millis(80),
                Duration::from_millis(270),
                Duration::from_millis(640),
            ]
        );
        assert_eq!(backoff.attempts(), 4);
    }

    #[test]
    fn test_delays_never_decrease_and_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(5));
        let mut previous = Duration::ZERO;
        for _ in 0..100 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(5));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_secs(5));
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), DEFAULT_BASE);
    }
}
