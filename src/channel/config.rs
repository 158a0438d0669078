//! Channel table configuration

use std::time::Duration;

/// Configuration for a [`ChannelTable`](super::ChannelTable)
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Silence window applied to channels created without their own timeout
    /// (0 = never reaped)
    pub default_silence_timeout_ms: u32,

    /// How often the reaper sweeps the table
    pub reap_interval: Duration,

    /// Log one unknown-channel drop per this many occurrences
    pub unknown_channel_log_interval: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_silence_timeout_ms: 3000,
            reap_interval: Duration::from_millis(100),
            unknown_channel_log_interval: 100,
        }
    }
}

impl ChannelConfig {
    /// Set the default silence timeout
    pub fn silence_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.default_silence_timeout_ms = timeout_ms;
        self
    }

    /// Set the reaper sweep interval (at least 1 ms)
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the unknown-channel log interval (at least 1)
    pub fn unknown_channel_log_interval(mut self, every: u64) -> Self {
        self.unknown_channel_log_interval = every.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();

        assert_eq!(config.default_silence_timeout_ms, 3000);
        assert_eq!(config.reap_interval, Duration::from_millis(100));
        assert_eq!(config.unknown_channel_log_interval, 100);
    }

    #[test]
    fn test_builder() {
        let config = ChannelConfig::default()
            .silence_timeout_ms(0)
            .reap_interval(Duration::from_millis(20))
            .unknown_channel_log_interval(10);

        assert_eq!(config.default_silence_timeout_ms, 0);
        assert_eq!(config.reap_interval, Duration::from_millis(20));
        assert_eq!(config.unknown_channel_log_interval, 10);
    }

    #[test]
    fn test_builder_clamps() {
        let config = ChannelConfig::default()
            .reap_interval(Duration::ZERO)
            .unknown_channel_log_interval(0);

        assert_eq!(config.reap_interval, Duration::from_millis(1));
        assert_eq!(config.unknown_channel_log_interval, 1);
    }
}
