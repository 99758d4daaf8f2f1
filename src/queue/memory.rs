//! In-process order queue.
//!
//! A channel-backed stand-in for the stream queue: requeueing nacks re-append
//! the envelope immediately (no idle delay, no retry budget). Used by unit
//! tests and in-process worker tests.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};

use super::{Acknowledger, Delivery, OrderQueue, Subscription};
use crate::errors::{AppError, Result};
use crate::model::Order;

/// Channel implementation of [`OrderQueue`]. Single subscriber.
pub struct MemoryOrderQueue {
    tx: mpsc::Sender<Order>,
    rx: Mutex<Option<mpsc::Receiver<Order>>>,
}

impl MemoryOrderQueue {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl OrderQueue for MemoryOrderQueue {
    async fn publish(&self, order: &Order) -> Result<()> {
        self.tx
            .send(order.clone())
            .await
            .map_err(|_| AppError::Internal("order queue closed".to_string()))
    }

    async fn subscribe(&self) -> Result<Subscription> {
        let mut inner = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::Internal("queue already subscribed".to_string()))?;

        let (out, deliveries) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let requeue_tx = self.tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    order = inner.recv() => {
                        let Some(order) = order else { break };
                        let delivery = Delivery::new(
                            order.clone(),
                            Box::new(MemoryAcker {
                                requeue_tx: requeue_tx.clone(),
                                order,
                            }),
                        );
                        if out.send(delivery).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Subscription::new(deliveries, cancel_tx))
    }
}

/// Settlement for channel deliveries: requeueing nacks re-append the order.
struct MemoryAcker {
    requeue_tx: mpsc::Sender<Order>,
    order: Order,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) {}

    async fn nack(&self, requeue: bool) {
        if requeue {
            let _ = self.requeue_tx.send(self.order.clone()).await;
        }
    }
}
