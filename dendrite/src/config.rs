//! Engine and queue configuration.
//!
//! Plain data, built once and threaded through constructors. The original
//! system kept a process-wide lazily-built cache of output-format
//! instructions; here that becomes the explicitly constructed
//! [`InstructionCatalog`](crate::strategy::InstructionCatalog) owned by the
//! strategy, with the knobs below controlling everything else.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the orchestration engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum tree depth; a node at this depth fails before classification
    pub max_depth: usize,

    /// Maximum oracle calls per validated request (initial call + retries)
    pub max_validation_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_validation_attempts: 3,
        }
    }
}

/// Configuration for the concurrency queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of concurrently running entries
    pub concurrency: usize,

    /// Automatic retries after the first failed attempt
    ///
    /// An entry's `max_attempts` is `retry_limit + 1` unless overridden
    /// per entry.
    pub retry_limit: u32,

    /// Base delay for exponential backoff between attempts
    #[serde(with = "duration_millis")]
    pub base_retry_delay: Duration,

    /// Upper bound on the backoff delay before jitter
    #[serde(with = "duration_millis")]
    pub max_retry_delay: Duration,

    /// Default per-attempt timeout; `None` disables timeouts
    #[serde(default, with = "opt_duration_millis")]
    pub default_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry_limit: 2,
            base_retry_delay: Duration::from_millis(250),
            max_retry_delay: Duration::from_secs(30),
            default_timeout: None,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.max_validation_attempts, 3);
    }

    #[test]
    fn test_queue_config_roundtrip() {
        let config = QueueConfig {
            concurrency: 2,
            retry_limit: 1,
            base_retry_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),
            default_timeout: Some(Duration::from_secs(1)),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: QueueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.concurrency, 2);
        assert_eq!(back.base_retry_delay, Duration::from_millis(100));
        assert_eq!(back.default_timeout, Some(Duration::from_secs(1)));
    }
}
