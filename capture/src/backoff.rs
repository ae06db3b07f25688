use std::time::Duration;

/// Linear reconnect schedule with an upper bound.
///
/// Each consecutive failure waits `min(base * attempts, cap)`. A successful
/// connection calls `reset`, so the next failure starts again at `base`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempts: 0,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.base.saturating_mul(self.attempts).min(self.cap)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_linearly_until_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(30));
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 15, 20, 25, 30, 30, 30]);
        assert_eq!(backoff.attempts(), 8);
    }

    #[test]
    fn wait_before_attempt_n_plus_one_is_min_of_base_times_n_and_cap() {
        let base = Duration::from_millis(700);
        let cap = Duration::from_secs(4);
        let mut backoff = Backoff::new(base, cap);
        for n in 1..=12u32 {
            assert_eq!(backoff.next_delay(), (base * n).min(cap));
        }
    }

    #[test]
    fn success_resets_to_base() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(30));
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }
}
