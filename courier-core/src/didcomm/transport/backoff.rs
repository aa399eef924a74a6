use std::time::Duration;

/// `ReconnectBackoff` computes `min(base * 2^attempt, cap)` delays
///
/// Without a cap the delay keeps doubling until it saturates. The attempt counter is reset once
/// a reconnection succeeds.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    cap: Option<Duration>,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, cap: Option<Duration>) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// `delay_for` is the pure form used by [`ReconnectBackoff::next_delay`]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor);

        match self.cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// `next_delay` returns the delay of the current attempt and moves to the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use table_test::table_test;

    #[test]
    fn test_delay_is_bounded() {
        let backoff = ReconnectBackoff::new(
            Duration::from_millis(100),
            Some(Duration::from_millis(10_000)),
        );

        for attempt in 0..64u32 {
            let expected = std::cmp::min(
                100u128.saturating_mul(2u128.saturating_pow(attempt)),
                10_000,
            );

            assert_eq!(backoff.delay_for(attempt).as_millis(), expected)
        }
    }

    #[test]
    fn test_uncapped_delays() {
        let table = vec![(0u32, 100u128), (1, 200), (2, 400), (5, 3_200)];
        let backoff = ReconnectBackoff::new(Duration::from_millis(100), None);

        for (validator, input, expected) in table_test!(table) {
            validator
                .given(&format!("attempt {}", input))
                .when("compute delay without cap")
                .then("it should double each attempt")
                .assert_eq(expected, backoff.delay_for(input.clone()).as_millis());
        }

        assert_eq!(backoff.delay_for(200), Duration::from_millis(100).saturating_mul(u32::MAX))
    }

    #[test]
    fn test_next_delay_and_reset() {
        let mut backoff = ReconnectBackoff::new(Duration::from_millis(100), None);

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100))
    }
}
