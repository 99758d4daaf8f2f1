//! Durable order queue.
//!
//! At-least-once delivery of order envelopes from the order service to
//! one-of-N workers. This module contains:
//! - `OrderQueue` trait: publish and subscribe
//! - `Delivery` / `Acknowledger`: per-message settlement
//! - `RedisStreamOrderQueue`: consumer-group implementation with delayed
//!   redelivery and poison-message discard
//! - `MemoryOrderQueue`: in-process channel implementation for tests

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::errors::Result;
use crate::model::Order;

pub mod memory;
pub mod redis_stream;

pub use memory::MemoryOrderQueue;
pub use redis_stream::RedisStreamOrderQueue;

/// Ordered log key holding serialized order envelopes.
pub const STREAM_KEY: &str = "orders:stream";
/// Consumer group shared by all workers.
pub const CONSUMER_GROUP: &str = "order-workers";
/// Prefix of broker-side consumer names.
pub const CONSUMER_NAME_PREFIX: &str = "worker";

/// Stream entry field the envelope is stored under. Part of the wire contract.
pub const ENVELOPE_FIELD: &str = "order";

/// Queue tuning. Zero durations / counts mean "use the default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Idle time in the pending set before a message becomes reclaimable.
    /// Doubles as the minimum redelivery delay after a requeueing nack.
    pub claim_min_idle: Duration,
    /// Delivery count at which a message is discarded as poison.
    pub max_retry_count: u32,
    /// Per-poll block time of the consumer read loop.
    pub read_block: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            claim_min_idle: Duration::from_secs(5),
            max_retry_count: 5,
            read_block: Duration::from_secs(2),
        }
    }
}

impl QueueConfig {
    /// Replace zero values with their defaults.
    pub fn normalized(self) -> Self {
        let defaults = Self::default();
        Self {
            claim_min_idle: if self.claim_min_idle.is_zero() {
                defaults.claim_min_idle
            } else {
                self.claim_min_idle
            },
            max_retry_count: if self.max_retry_count == 0 {
                defaults.max_retry_count
            } else {
                self.max_retry_count
            },
            read_block: if self.read_block.is_zero() {
                defaults.read_block
            } else {
                self.read_block
            },
        }
    }
}

/// Per-delivery settlement handle.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Settle the delivery as processed.
    async fn ack(&self);

    /// Negative settlement. `requeue = true` leaves the message in flight for
    /// delayed redelivery; `requeue = false` discards it.
    async fn nack(&self, requeue: bool);
}

/// One delivered order envelope.
pub struct Delivery {
    pub order: Order,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(order: Order, acker: Box<dyn Acknowledger>) -> Self {
        Self { order, acker }
    }

    pub async fn ack(&self) {
        self.acker.ack().await;
    }

    pub async fn nack(&self, requeue: bool) {
        self.acker.nack(requeue).await;
    }
}

/// A live subscription. Dropping it (or calling [`Subscription::stop`])
/// terminates the producer loops behind it.
pub struct Subscription {
    deliveries: mpsc::Receiver<Delivery>,
    cancel: watch::Sender<bool>,
}

impl Subscription {
    pub(crate) fn new(deliveries: mpsc::Receiver<Delivery>, cancel: watch::Sender<bool>) -> Self {
        Self { deliveries, cancel }
    }

    /// Next delivery, or `None` once the subscription has terminated.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    /// Signal the producer loops to stop. Buffered deliveries can still be
    /// received afterwards.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Publish/subscribe contract for order envelopes.
#[async_trait]
pub trait OrderQueue: Send + Sync {
    /// Append an envelope to the durable log. Returns once the broker
    /// acknowledges the append.
    async fn publish(&self, order: &Order) -> Result<()>;

    /// Start consuming. Each delivery carries the decoded envelope and its
    /// settlement handle.
    async fn subscribe(&self) -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_normalization_keeps_nonzero() {
        let cfg = QueueConfig {
            claim_min_idle: Duration::from_millis(100),
            max_retry_count: 2,
            read_block: Duration::from_millis(300),
        }
        .normalized();
        assert_eq!(cfg.claim_min_idle, Duration::from_millis(100));
        assert_eq!(cfg.max_retry_count, 2);
        assert_eq!(cfg.read_block, Duration::from_millis(300));
    }

    #[test]
    fn test_config_normalization_fills_zeroes() {
        let cfg = QueueConfig {
            claim_min_idle: Duration::ZERO,
            max_retry_count: 0,
            read_block: Duration::ZERO,
        }
        .normalized();
        assert_eq!(cfg, QueueConfig::default());
    }
}
