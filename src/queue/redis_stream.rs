//! Redis Streams order queue.
//!
//! One ordered log (`orders:stream`), one consumer group (`order-workers`),
//! unique consumer names per worker. The main read loop only reads new
//! messages (`>`); a consumer's own orphaned in-flight messages are recovered
//! by the auto-claim loop once they have idled past `claim_min_idle`, which
//! makes that idle time the minimum retry delay. Messages whose delivery
//! count reaches `max_retry_count` are force-acknowledged and dropped.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    Acknowledger, Delivery, OrderQueue, QueueConfig, Subscription, CONSUMER_GROUP,
    CONSUMER_NAME_PREFIX, ENVELOPE_FIELD, STREAM_KEY,
};
use crate::errors::Result;
use crate::model::Order;

/// Messages pulled per XREADGROUP / XAUTOCLAIM round.
const READ_COUNT: usize = 10;
/// Back-off after a transport error in the read loop.
const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Redis Streams implementation of [`OrderQueue`].
pub struct RedisStreamOrderQueue {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
    cfg: QueueConfig,
}

impl RedisStreamOrderQueue {
    /// Create the queue and ensure the consumer group exists.
    ///
    /// An empty `consumer_id` generates a fresh unique consumer name, so
    /// concurrent workers never share one by accident.
    pub async fn new(
        conn: ConnectionManager,
        consumer_id: &str,
        cfg: QueueConfig,
    ) -> Result<Self> {
        let consumer = if consumer_id.is_empty() {
            format!("{CONSUMER_NAME_PREFIX}:{}", Uuid::new_v4())
        } else {
            format!("{CONSUMER_NAME_PREFIX}:{consumer_id}")
        };

        let queue = Self {
            conn,
            stream_key: STREAM_KEY.to_string(),
            group: CONSUMER_GROUP.to_string(),
            consumer,
            cfg: cfg.normalized(),
        };
        queue.ensure_consumer_group().await?;
        Ok(queue)
    }

    /// Idempotent group creation: an already-existing group is not an error.
    async fn ensure_consumer_group(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.group, "0")
            .await;

        match created {
            Ok(()) => {
                info!(stream = %self.stream_key, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Decode a stream entry into an order envelope.
    ///
    /// Entries without a decodable `order` field are schema bugs: they are
    /// logged and skipped without delivery.
    fn decode_entry(entry: &StreamId) -> Option<Order> {
        let raw = match entry.map.get(ENVELOPE_FIELD) {
            Some(value) => value,
            None => {
                warn!(message_id = %entry.id, "Invalid stream entry: missing order field");
                return None;
            }
        };

        let payload: String = match redis::from_redis_value(raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(message_id = %entry.id, error = %e, "Invalid stream entry: non-text order field");
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(order) => Some(order),
            Err(e) => {
                warn!(message_id = %entry.id, error = %e, "Failed to decode order envelope");
                None
            }
        }
    }
}

#[async_trait]
impl OrderQueue for RedisStreamOrderQueue {
    async fn publish(&self, order: &Order) -> Result<()> {
        let payload = serde_json::to_string(order)?;
        let mut conn = self.conn.clone();
        let _id: String = conn
            .xadd(&self.stream_key, "*", &[(ENVELOPE_FIELD, payload.as_str())])
            .await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(READ_COUNT);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let reader = LoopState {
            conn: self.conn.clone(),
            stream_key: self.stream_key.clone(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            cfg: self.cfg,
            out: tx.clone(),
            cancel: cancel_rx.clone(),
        };
        tokio::spawn(reader.run_read_loop());

        let claimer = LoopState {
            conn: self.conn.clone(),
            stream_key: self.stream_key.clone(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            cfg: self.cfg,
            out: tx,
            cancel: cancel_rx,
        };
        tokio::spawn(claimer.run_auto_claim_loop());

        Ok(Subscription::new(rx, cancel_tx))
    }
}

/// Shared state of the two background loops behind a subscription.
struct LoopState {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
    cfg: QueueConfig,
    out: mpsc::Sender<Delivery>,
    cancel: watch::Receiver<bool>,
}

impl LoopState {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Main read loop: new messages only (`>` cursor). Recovery of in-flight
    /// messages belongs to the auto-claim loop.
    async fn run_read_loop(mut self) {
        debug!(consumer = %self.consumer, "Stream read loop started");
        loop {
            tokio::select! {
                changed = self.cancel.changed() => {
                    if changed.is_err() || self.cancelled() {
                        break;
                    }
                }
                read = Self::read_new(
                    self.conn.clone(),
                    &self.stream_key,
                    &self.group,
                    &self.consumer,
                    self.cfg.read_block,
                ) => {
                    match read {
                        Ok(entries) => {
                            if !self.deliver_all(entries).await {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "XREADGROUP failed");
                            tokio::time::sleep(READ_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }
        debug!(consumer = %self.consumer, "Stream read loop stopped");
    }

    async fn read_new(
        mut conn: ConnectionManager,
        stream_key: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> redis::RedisResult<Vec<StreamId>> {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(READ_COUNT)
            .block(block.as_millis() as usize);

        let reply: Option<StreamReadReply> =
            conn.xread_options(&[stream_key], &[">"], &opts).await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        Ok(reply
            .keys
            .into_iter()
            .filter(|key| key.key == stream_key)
            .flat_map(|key| key.ids)
            .collect())
    }

    /// Reclaim loop: every `claim_min_idle`, pick up messages that have been
    /// in flight longer than `claim_min_idle` and redeliver them, dropping
    /// the ones that exhausted their retry budget.
    async fn run_auto_claim_loop(mut self) {
        let period = self.cfg.claim_min_idle;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let mut start_id = "0-0".to_string();

        loop {
            tokio::select! {
                changed = self.cancel.changed() => {
                    if changed.is_err() || self.cancelled() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.claim_idle(&start_id).await {
                        Ok((claimed, next_id)) => {
                            start_id = if next_id.is_empty() { "0-0".to_string() } else { next_id };

                            let mut survivors = Vec::with_capacity(claimed.len());
                            for entry in claimed {
                                if self.passes_poison_check(&entry.id).await {
                                    survivors.push(entry);
                                }
                            }
                            if !self.deliver_all(survivors).await {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "XAUTOCLAIM failed");
                        }
                    }
                }
            }
        }
        debug!(consumer = %self.consumer, "Auto-claim loop stopped");
    }

    async fn claim_idle(&self, start_id: &str) -> redis::RedisResult<(Vec<StreamId>, String)> {
        let mut conn = self.conn.clone();
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.stream_key,
                &self.group,
                &self.consumer,
                self.cfg.claim_min_idle.as_millis() as usize,
                start_id,
                StreamAutoClaimOptions::default().count(READ_COUNT),
            )
            .await?;

        Ok((reply.claimed, reply.next_stream_id))
    }

    /// A reclaimed message whose delivery count reached the retry budget is
    /// force-acknowledged and dropped.
    async fn passes_poison_check(&self, message_id: &str) -> bool {
        let retries = match self.delivery_count(message_id).await {
            Ok(retries) => retries,
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "Failed to read delivery count");
                return true;
            }
        };

        if retries >= self.cfg.max_retry_count as usize {
            warn!(
                message_id = %message_id,
                retries,
                max_retries = self.cfg.max_retry_count,
                "Discarding poison message"
            );
            let mut conn = self.conn.clone();
            let acked: redis::RedisResult<i64> = conn
                .xack(&self.stream_key, &self.group, &[message_id])
                .await;
            if let Err(e) = acked {
                error!(message_id = %message_id, error = %e, "Failed to ack poison message");
            }
            return false;
        }
        true
    }

    async fn delivery_count(&self, message_id: &str) -> redis::RedisResult<usize> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingCountReply = conn
            .xpending_count(&self.stream_key, &self.group, message_id, message_id, 1)
            .await?;

        Ok(reply
            .ids
            .first()
            .map(|pending| pending.times_delivered)
            .unwrap_or(0))
    }

    /// Push decoded deliveries to the subscriber. Returns `false` once the
    /// subscription is gone.
    async fn deliver_all(&mut self, entries: Vec<StreamId>) -> bool {
        for entry in entries {
            let Some(order) = RedisStreamOrderQueue::decode_entry(&entry) else {
                continue;
            };

            let delivery = Delivery::new(
                order,
                Box::new(StreamAcker {
                    conn: self.conn.clone(),
                    stream_key: self.stream_key.clone(),
                    group: self.group.clone(),
                    message_id: entry.id.clone(),
                    claim_min_idle: self.cfg.claim_min_idle,
                }),
            );

            tokio::select! {
                sent = self.out.send(delivery) => {
                    if sent.is_err() {
                        return false;
                    }
                }
                changed = self.cancel.changed() => {
                    if changed.is_err() || self.cancelled() {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// XACK-based settlement for stream deliveries.
struct StreamAcker {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    message_id: String,
    claim_min_idle: Duration,
}

impl StreamAcker {
    async fn ack_entry(&self, context: &str) {
        let mut conn = self.conn.clone();
        let acked: redis::RedisResult<i64> = conn
            .xack(&self.stream_key, &self.group, &[self.message_id.as_str()])
            .await;
        if let Err(e) = acked {
            error!(message_id = %self.message_id, error = %e, "{context} failed");
        }
    }
}

#[async_trait]
impl Acknowledger for StreamAcker {
    async fn ack(&self) {
        self.ack_entry("XACK").await;
    }

    async fn nack(&self, requeue: bool) {
        if requeue {
            // Leave the entry in the pending set; the auto-claim loop picks
            // it up after claim_min_idle, which is the retry delay.
            info!(
                message_id = %self.message_id,
                claim_min_idle_ms = self.claim_min_idle.as_millis() as u64,
                "Message nacked for retry"
            );
            return;
        }
        self.ack_entry("XACK discard").await;
    }
}
