use std::time::Duration;

/// Tunables of the player engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// Upper bound for a synchronous `prepare`.
    pub prepare_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            prepare_timeout: Duration::from_secs(5),
        }
    }
}

impl PlayerConfig {
    pub fn with_prepare_timeout(mut self, timeout: Duration) -> Self {
        self.prepare_timeout = timeout;
        self
    }
}

/// Tunables of the record pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    /// How long `stop(drain)` waits for every stage to report drain completion.
    pub drain_timeout: Duration,
    /// Extra attempts after a transient drain failure.
    pub drain_retries: u32,
    /// A recording with no frame written for this long counts as stalled.
    pub stall_threshold: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(3),
            drain_retries: 1,
            stall_threshold: Duration::from_secs(2),
        }
    }
}

impl RecorderConfig {
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_drain_retries(mut self, retries: u32) -> Self {
        self.drain_retries = retries;
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = threshold;
        self
    }
}

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_setters() {
        let player = PlayerConfig::default();
        assert_eq!(player.prepare_timeout, Duration::from_secs(5));
        let player = player.with_prepare_timeout(Duration::from_millis(50));
        assert_eq!(player.prepare_timeout, Duration::from_millis(50));

        let recorder = RecorderConfig::default()
            .with_drain_retries(3)
            .with_stall_threshold(Duration::from_millis(250));
        assert_eq!(recorder.drain_timeout, Duration::from_secs(3));
        assert_eq!(recorder.drain_retries, 3);
        assert_eq!(recorder.stall_threshold, Duration::from_millis(250));
    }
}
