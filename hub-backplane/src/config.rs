//! Backplane configuration.
//!
//! Groups the knobs of the connection actors: the attempts limit that
//! forces a disconnect, how long idle activations stay in memory, and the
//! mailbox size of each activation.

use std::time::Duration;

/// Default number of consecutive undeliverable sends before a forced disconnect.
pub const DEFAULT_MAX_FAIL_ATTEMPTS: u32 = 3;

/// Default idle time before an activation is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default time a disconnected activation lingers before eviction.
pub const DEFAULT_DEACTIVATION_DELAY: Duration = Duration::from_secs(1);

/// Default bounded mailbox capacity per activation.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 128;

/// Invalid configuration values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The attempts limit must be at least one.
    #[error("max_fail_attempts must be greater than zero")]
    ZeroFailAttempts,

    /// The mailbox must hold at least one command.
    #[error("mailbox_capacity must be greater than zero")]
    ZeroMailboxCapacity,
}

/// Configuration shared by every connection actor of a catalog.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use hub_backplane::BackplaneConfig;
///
/// let config = BackplaneConfig::builder()
///     .max_fail_attempts(5)
///     .idle_timeout(Duration::from_secs(30))
///     .build()
///     .expect("valid config");
/// assert_eq!(config.max_fail_attempts(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackplaneConfig {
    max_fail_attempts: u32,
    idle_timeout: Duration,
    deactivation_delay: Duration,
    mailbox_capacity: usize,
}

impl BackplaneConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> BackplaneConfigBuilder {
        BackplaneConfigBuilder::default()
    }

    /// Consecutive undeliverable sends that trigger a forced disconnect.
    pub fn max_fail_attempts(&self) -> u32 {
        self.max_fail_attempts
    }

    /// How long an activation may stay idle before it is evicted.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// How long a disconnected activation lingers before it is evicted.
    pub fn deactivation_delay(&self) -> Duration {
        self.deactivation_delay
    }

    /// Bounded mailbox capacity per activation.
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self {
            max_fail_attempts: DEFAULT_MAX_FAIL_ATTEMPTS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            deactivation_delay: DEFAULT_DEACTIVATION_DELAY,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// Builder for [`BackplaneConfig`].
#[derive(Debug, Clone, Default)]
pub struct BackplaneConfigBuilder {
    max_fail_attempts: Option<u32>,
    idle_timeout: Option<Duration>,
    deactivation_delay: Option<Duration>,
    mailbox_capacity: Option<usize>,
}

impl BackplaneConfigBuilder {
    /// Set the attempts limit.
    pub fn max_fail_attempts(mut self, attempts: u32) -> Self {
        self.max_fail_attempts = Some(attempts);
        self
    }

    /// Set the idle eviction timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set how long a disconnected activation lingers.
    pub fn deactivation_delay(mut self, delay: Duration) -> Self {
        self.deactivation_delay = Some(delay);
        self
    }

    /// Set the mailbox capacity.
    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = Some(capacity);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<BackplaneConfig, ConfigError> {
        let defaults = BackplaneConfig::default();
        let config = BackplaneConfig {
            max_fail_attempts: self.max_fail_attempts.unwrap_or(defaults.max_fail_attempts),
            idle_timeout: self.idle_timeout.unwrap_or(defaults.idle_timeout),
            deactivation_delay: self
                .deactivation_delay
                .unwrap_or(defaults.deactivation_delay),
            mailbox_capacity: self.mailbox_capacity.unwrap_or(defaults.mailbox_capacity),
        };

        if config.max_fail_attempts == 0 {
            return Err(ConfigError::ZeroFailAttempts);
        }
        if config.mailbox_capacity == 0 {
            return Err(ConfigError::ZeroMailboxCapacity);
        }
        Ok(config)
    }
}
