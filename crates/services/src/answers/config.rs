use std::time::Duration;

pub const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 2_000;

/// Background flush settings for an `AnswerCache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    interval: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_AUTOSAVE_INTERVAL_MS),
        }
    }
}

impl AutosaveConfig {
    /// A non-positive interval disables the background flush.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        let millis = u64::try_from(millis).unwrap_or(0);
        Self {
            interval: Duration::from_millis(millis),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The flush period, or `None` when autosave is off.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.interval().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_two_seconds() {
        let config = AutosaveConfig::default();
        assert_eq!(config.interval(), Some(Duration::from_millis(2_000)));
        assert!(config.is_enabled());
    }

    #[test]
    fn non_positive_millis_disable_autosave() {
        assert!(!AutosaveConfig::from_millis(0).is_enabled());
        assert!(!AutosaveConfig::from_millis(-50).is_enabled());
        assert_eq!(
            AutosaveConfig::from_millis(250).interval(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn builder_overrides_interval() {
        let config = AutosaveConfig::disabled().with_interval(Duration::from_secs(5));
        assert_eq!(config.interval(), Some(Duration::from_secs(5)));
    }
}
