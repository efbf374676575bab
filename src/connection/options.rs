use std::time::Duration;

/// Tuning knobs for the push connection: reconnect backoff, the
/// application-level keepalive cadence and the idle-close grace period.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Delay for the first reconnect attempt; doubles per failure.
    pub base_delay: Duration,
    /// Ceiling for the computed reconnect delay.
    pub max_delay: Duration,
    /// Consecutive connect failures tolerated before giving up for good.
    pub max_failed_attempts: u32,
    /// Interval between application-level `{"ping": 1}` frames.
    pub keepalive_interval: Duration,
    /// Pause after the charger closes the stream without an error, so the
    /// device gets a moment before the next dial.
    pub idle_grace: Duration,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
            max_failed_attempts: 5,
            keepalive_interval: Duration::from_secs(300),
            idle_grace: Duration::from_secs(5),
        }
    }
}

impl PushOptions {
    /// Creates options with the default charger-friendly timings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates aggressive timings for tests.
    pub fn fast() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_failed_attempts: 3,
            keepalive_interval: Duration::from_millis(100),
            idle_grace: Duration::from_millis(10),
        }
    }

    /// Sets the initial reconnect delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the reconnect delay ceiling.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the consecutive-failure ceiling.
    #[must_use]
    pub fn with_max_failed_attempts(mut self, max_failed_attempts: u32) -> Self {
        self.max_failed_attempts = max_failed_attempts;
        self
    }

    /// Sets the keepalive ping interval.
    #[must_use]
    pub fn with_keepalive_interval(mut self, keepalive_interval: Duration) -> Self {
        self.keepalive_interval = keepalive_interval;
        self
    }

    /// Sets the idle-close grace period.
    #[must_use]
    pub fn with_idle_grace(mut self, idle_grace: Duration) -> Self {
        self.idle_grace = idle_grace;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("base_delay must be greater than 0".to_string());
        }

        if self.max_delay < self.base_delay {
            return Err("max_delay must be greater than or equal to base_delay".to_string());
        }

        if self.max_failed_attempts == 0 {
            return Err("max_failed_attempts must be greater than 0".to_string());
        }

        if self.keepalive_interval.is_zero() {
            return Err("keepalive_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let options = PushOptions::default();
        assert_eq!(options.base_delay, Duration::from_secs(30));
        assert_eq!(options.max_delay, Duration::from_secs(300));
        assert_eq!(options.max_failed_attempts, 5);
        assert_eq!(options.keepalive_interval, Duration::from_secs(300));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_chaining() {
        let options = PushOptions::new()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10))
            .with_max_failed_attempts(2)
            .with_keepalive_interval(Duration::from_secs(15))
            .with_idle_grace(Duration::from_secs(1));

        assert_eq!(options.base_delay, Duration::from_secs(1));
        assert_eq!(options.max_delay, Duration::from_secs(10));
        assert_eq!(options.max_failed_attempts, 2);
        assert_eq!(options.keepalive_interval, Duration::from_secs(15));
        assert_eq!(options.idle_grace, Duration::from_secs(1));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_delay() {
        let options = PushOptions::new().with_base_delay(Duration::ZERO);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let options = PushOptions::new()
            .with_base_delay(Duration::from_secs(60))
            .with_max_delay(Duration::from_secs(30));
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let options = PushOptions::new().with_max_failed_attempts(0);
        assert!(options.validate().is_err());
    }
}
