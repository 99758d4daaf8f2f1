//! Order queue configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::queue::QueueConfig;

/// Tuning knobs for the durable order queue.
///
/// Zero values mean "use the default", not "disable"; they are normalized
/// when converted into the runtime [`QueueConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Idle time in the pending set before a message becomes reclaimable.
    pub claim_min_idle_ms: u64,
    /// Delivery count at which a message is discarded as poison.
    pub max_retry_count: u32,
    /// Per-poll block time of the consumer read loop.
    pub read_block_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            claim_min_idle_ms: 5_000,
            max_retry_count: 5,
            read_block_ms: 2_000,
        }
    }
}

impl QueueSettings {
    /// Convert into the runtime queue configuration, applying defaults for
    /// zero values.
    pub fn to_queue_config(&self) -> QueueConfig {
        QueueConfig {
            claim_min_idle: Duration::from_millis(self.claim_min_idle_ms),
            max_retry_count: self.max_retry_count,
            read_block: Duration::from_millis(self.read_block_ms),
        }
        .normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let settings = QueueSettings {
            claim_min_idle_ms: 0,
            max_retry_count: 0,
            read_block_ms: 0,
        };
        let cfg = settings.to_queue_config();
        assert_eq!(cfg.claim_min_idle, Duration::from_secs(5));
        assert_eq!(cfg.max_retry_count, 5);
        assert_eq!(cfg.read_block, Duration::from_secs(2));
    }

    #[test]
    fn test_explicit_values_preserved() {
        let settings = QueueSettings {
            claim_min_idle_ms: 200,
            max_retry_count: 3,
            read_block_ms: 500,
        };
        let cfg = settings.to_queue_config();
        assert_eq!(cfg.claim_min_idle, Duration::from_millis(200));
        assert_eq!(cfg.max_retry_count, 3);
        assert_eq!(cfg.read_block, Duration::from_millis(500));
    }
}
