//! Exponential backoff schedule for transient cycle failures.

use std::time::Duration;

/// Doubling delay schedule with a cap.
///
/// The first failure waits the initial delay; each consecutive failure
/// doubles the wait up to the cap. A successful cycle resets the schedule.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    /// Delay to wait before the next retry.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial.min(self.max),
            Some(current) => (current * 2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    /// Forget accumulated failures after a successful cycle.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_reset_restarts_the_schedule() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_initial_delay_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(5));

        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }
}
