//! Engine configuration.

use std::time::Duration;

/// Timing configuration shared by every kind's wait specs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for a create pass's wait.
    pub create_timeout: Duration,

    /// Deadline for each post-mutation wait during an update pass.
    pub update_timeout: Duration,

    /// Deadline for a delete pass's wait.
    pub delete_timeout: Duration,

    /// Interval between status probes.
    pub poll_interval: Duration,

    /// Delay before the first probe after an associate/disassociate-type
    /// mutation, to outlast the remote's stale "ready" window.
    pub settle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_timeout: Duration::from_secs(30 * 60),
            update_timeout: Duration::from_secs(30 * 60),
            delete_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(5),
            settle_delay: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            create_timeout: env_secs("STEWARD_CREATE_TIMEOUT_SECS", defaults.create_timeout),
            update_timeout: env_secs("STEWARD_UPDATE_TIMEOUT_SECS", defaults.update_timeout),
            delete_timeout: env_secs("STEWARD_DELETE_TIMEOUT_SECS", defaults.delete_timeout),
            poll_interval: env_secs("STEWARD_POLL_INTERVAL_SECS", defaults.poll_interval),
            settle_delay: env_secs("STEWARD_SETTLE_DELAY_SECS", defaults.settle_delay),
        }
    }
}

fn env_secs(var: &str, default: Duration) -> Duration {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.create_timeout, Duration::from_secs(1800));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.settle_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("STEWARD_POLL_INTERVAL_SECS", "7");
        let config = EngineConfig::from_env();
        assert_eq!(config.poll_interval, Duration::from_secs(7));
        std::env::remove_var("STEWARD_POLL_INTERVAL_SECS");
    }
}
