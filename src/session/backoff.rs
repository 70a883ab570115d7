//! Monitoring backoff
//!
//! Between not-live polls the session waits an exponentially growing
//! interval, clamped at the configured maximum. Seeing the user live (even
//! if the capture then fails) resets the wait to its initial value.

use crate::config::BackoffConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: config.initial,
        }
    }

    /// The wait to apply before the next poll.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the wait for the next round, clamped to the maximum.
    pub fn advance(&mut self) {
        self.current = (self.current * 2).min(self.config.max);
    }

    /// Reset to the initial wait.
    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial: u64, max: u64) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_secs(initial),
            max: Duration::from_secs(max),
        }
    }

    #[test]
    fn doubles_until_clamped() {
        let mut backoff = Backoff::new(config(180, 1800));
        assert_eq!(backoff.current(), Duration::from_secs(180));
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(360));
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(720));
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(1440));
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(1800));
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(1800));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::new(config(60, 960));
        backoff.advance();
        backoff.advance();
        assert_eq!(backoff.current(), Duration::from_secs(240));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(60));
    }
}
