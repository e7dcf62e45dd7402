//! Notifier and transport configuration
//!
//! All values are consumed at construction time and never mutated afterwards.

use std::time::Duration;

/// Default broadcast topic prefix used when none is configured.
pub const DEFAULT_TOPIC_PREFIX: &str = "cachebus";

/// Configuration for the cache notifier
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Prefix for broadcast topic names (`<prefix>:topic:<cache_name>`)
    pub topic_prefix: String,
    /// Drop dispatched events that carry this instance's own source id.
    /// Self-echoed evictions are idempotent, so this is an optimization only.
    pub ignore_own_events: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_owned(),
            ignore_own_events: false,
        }
    }
}

impl NotifierConfig {
    /// Configuration with a custom topic prefix.
    pub fn with_prefix(topic_prefix: impl Into<String>) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
            ..Self::default()
        }
    }
}

/// Connection parameters for the Redis transport
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis host
    pub host: String,
    /// Redis port
    pub port: u16,
    /// Username for Redis ACL authentication, if any
    pub username: Option<String>,
    /// Password, if any
    pub password: Option<String>,
    /// Redis logical database
    pub database: i64,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Per-request response timeout; `None` waits indefinitely
    pub response_timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            connect_timeout: Duration::from_secs(2),
            response_timeout: None,
        }
    }
}
