//! Exponential backoff for client reconnection.

use crate::options::ReconnectOptions;

use std::time::Duration;

/// Tracks reconnection attempts and the delay before the next one.
///
/// # Example
///
/// ```rust
/// use keelson_core::options::ReconnectOptions;
/// use keelson_core::reconnect::ReconnectState;
/// use std::time::Duration;
///
/// let options = ReconnectOptions::default()
///     .with_interval(Duration::from_millis(100))
///     .with_max_interval(Duration::from_secs(10));
/// let mut backoff = ReconnectState::new(&options);
///
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
///
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectState {
    base_interval: Duration,
    max_interval: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
    current_interval: Duration,
}

impl ReconnectState {
    pub const fn new(options: &ReconnectOptions) -> Self {
        Self {
            base_interval: options.interval,
            max_interval: options.max_interval,
            max_attempts: options.max_attempts,
            attempt: 0,
            current_interval: options.interval,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    ///
    /// The delay doubles per attempt up to `max_interval`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempt >= max) {
            return None;
        }
        let delay = self.current_interval;

        self.attempt += 1;
        self.current_interval = self
            .base_interval
            .saturating_mul(1_u32 << self.attempt.min(10))
            .min(self.max_interval);

        Some(delay)
    }

    /// Back to the base interval after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_interval = self.base_interval;
    }

    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[inline]
    #[must_use]
    pub const fn current_interval(&self) -> Duration {
        self.current_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(base_ms: u64, max_ms: u64) -> ReconnectOptions {
        ReconnectOptions::default()
            .with_interval(Duration::from_millis(base_ms))
            .with_max_interval(Duration::from_millis(max_ms))
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let mut state = ReconnectState::new(&options(100, 500));
        let delays: Vec<_> = (0..5).map(|_| state.next_delay().unwrap().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(state.attempt(), 5);
    }

    #[test]
    fn attempts_run_out() {
        let mut state = ReconnectState::new(&options(10, 100).with_max_attempts(Some(2)));
        assert!(state.next_delay().is_some());
        assert!(state.next_delay().is_some());
        assert_eq!(state.next_delay(), None);

        state.reset();
        assert_eq!(state.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(state.current_interval(), Duration::from_millis(20));
    }
}
