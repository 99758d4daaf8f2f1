//! Order worker.
//!
//! Long-running consumer loop: one subscription, sequential dispatch per
//! worker task, settlement driven by the dispatch result. The queue's retry
//! budget governs eventual discard; the worker keeps no counter of its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::errors::Result;
use crate::queue::OrderQueue;
use crate::service::OrderDispatcher;

/// Best-effort wait for the in-flight dispatch on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handle to a running worker loop.
pub struct WorkerHandle {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the loop to stop after the in-flight dispatch.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the loop to exit, bounded by the shutdown grace period.
    pub async fn join(self) {
        if tokio::time::timeout(SHUTDOWN_GRACE, self.handle).await.is_err() {
            warn!("Worker did not stop within the grace period");
        }
    }
}

/// Consumes order envelopes and drives them through dispatch.
pub struct OrderWorker {
    dispatcher: Arc<dyn OrderDispatcher>,
    queue: Arc<dyn OrderQueue>,
}

impl OrderWorker {
    pub fn new(dispatcher: Arc<dyn OrderDispatcher>, queue: Arc<dyn OrderQueue>) -> Self {
        Self { dispatcher, queue }
    }

    /// Subscribe and spawn the consumer loop. Non-blocking: a successful
    /// start returns immediately with the loop running in the background.
    pub async fn start(&self) -> Result<WorkerHandle> {
        let mut subscription = self.queue.subscribe().await?;
        let dispatcher = Arc::clone(&self.dispatcher);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!("Order worker started");
            loop {
                tokio::select! {
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    delivery = subscription.recv() => {
                        let Some(delivery) = delivery else { break };
                        match dispatcher.dispatch_order(&delivery.order).await {
                            Ok(()) => delivery.ack().await,
                            Err(e) => {
                                warn!(
                                    error = %e,
                                    request_id = %delivery.order.request_id,
                                    "Dispatch failed, message stays queued for retry"
                                );
                                delivery.nack(true).await;
                            }
                        }
                    }
                }
            }
            subscription.stop();
            info!("Order worker stopped");
        });

        Ok(WorkerHandle {
            cancel: cancel_tx,
            handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::{mpsc, Mutex};
    use uuid::Uuid;

    use super::*;
    use crate::errors::AppError;
    use crate::model::{Order, OrderStatus};
    use crate::queue::MemoryOrderQueue;

    fn test_order(request_id: &str) -> Order {
        Order {
            id: 0,
            order_id: Uuid::new_v4(),
            request_id: request_id.to_string(),
            user_id: 1,
            ticket_id: 1,
            quantity: 1,
            total_price: 100.0,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Dispatcher that reports each call and fails a configurable number of
    /// times before succeeding.
    struct ScriptedDispatcher {
        failures_left: Mutex<u32>,
        calls: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl OrderDispatcher for ScriptedDispatcher {
        async fn dispatch_order(&self, order: &Order) -> crate::errors::Result<()> {
            let _ = self.calls.send(order.request_id.clone());
            let mut failures = self.failures_left.lock().await;
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::Internal("db unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_dispatches_and_acks() {
        let queue = Arc::new(MemoryOrderQueue::new(8));
        let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(ScriptedDispatcher {
            failures_left: Mutex::new(0),
            calls: calls_tx,
        });

        let worker = OrderWorker::new(dispatcher, queue.clone());
        let handle = worker.start().await.unwrap();

        queue.publish(&test_order("req-worker")).await.unwrap();

        let dispatched = tokio::time::timeout(Duration::from_secs(1), calls_rx.recv())
            .await
            .expect("worker should dispatch in time")
            .unwrap();
        assert_eq!(dispatched, "req-worker");

        handle.stop();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_worker_nacks_on_failure_and_retries() {
        let queue = Arc::new(MemoryOrderQueue::new(8));
        let (calls_tx, mut calls_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(ScriptedDispatcher {
            failures_left: Mutex::new(2),
            calls: calls_tx,
        });

        let worker = OrderWorker::new(dispatcher, queue.clone());
        let handle = worker.start().await.unwrap();

        queue.publish(&test_order("req-flaky")).await.unwrap();

        // Two failed dispatches, then the successful third.
        for _ in 0..3 {
            let dispatched = tokio::time::timeout(Duration::from_secs(1), calls_rx.recv())
                .await
                .expect("expected redelivery")
                .unwrap();
            assert_eq!(dispatched, "req-flaky");
        }

        // No fourth delivery once acked.
        let extra = tokio::time::timeout(Duration::from_millis(200), calls_rx.recv()).await;
        assert!(extra.is_err());

        handle.stop();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let queue = Arc::new(MemoryOrderQueue::new(8));
        let (calls_tx, _calls_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(ScriptedDispatcher {
            failures_left: Mutex::new(0),
            calls: calls_tx,
        });

        let worker = OrderWorker::new(dispatcher, queue);
        let handle = worker.start().await.unwrap();

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .expect("worker should stop promptly");
    }
}
