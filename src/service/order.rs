//! Order service.
//!
//! Sequences the two halves of the pipeline: the synchronous
//! reserve -> publish handshake (`prepare_order`) and the asynchronous
//! dispatch -> commit path invoked by the worker (`dispatch_order`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::inventory::TicketInventory;
use crate::model::{CreateOrderRequest, Order, OrderStatus};
use crate::queue::OrderQueue;
use crate::repository::{OrderRepository, TicketRepository};

/// The worker's seam: turn a delivered envelope into durable state.
#[async_trait]
pub trait OrderDispatcher: Send + Sync {
    async fn dispatch_order(&self, order: &Order) -> Result<()>;
}

/// Orchestrates order admission and fulfillment.
pub struct OrderService {
    pool: PgPool,
    orders: Arc<dyn OrderRepository>,
    tickets: Arc<dyn TicketRepository>,
    inventory: Arc<dyn TicketInventory>,
    queue: Arc<dyn OrderQueue>,
}

impl OrderService {
    pub fn new(
        pool: PgPool,
        orders: Arc<dyn OrderRepository>,
        tickets: Arc<dyn TicketRepository>,
        inventory: Arc<dyn TicketInventory>,
        queue: Arc<dyn OrderQueue>,
    ) -> Self {
        Self {
            pool,
            orders,
            tickets,
            inventory,
            queue,
        }
    }

    /// Admit a purchase request.
    ///
    /// Reserves stock in the inventory engine, then enqueues the envelope for
    /// durable fulfillment. The caller gets the pending order back
    /// immediately; persistence happens behind the queue.
    ///
    /// If the publish fails, the reservation is compensated before the error
    /// is returned. The compensation runs on its own task so a disconnecting
    /// caller cannot cancel it mid-flight; orphaned reserved stock would be
    /// unrecoverable without operator action.
    pub async fn prepare_order(&self, req: CreateOrderRequest) -> Result<Order> {
        if req.quantity < 1 {
            return Err(AppError::InvalidInput);
        }

        let unit_price = self
            .inventory
            .reserve(req.ticket_id, req.quantity, req.user_id)
            .await?;

        let now = Utc::now();
        let order = Order {
            id: 0,
            order_id: Uuid::new_v4(),
            request_id: Uuid::new_v4().to_string(),
            user_id: req.user_id,
            ticket_id: req.ticket_id,
            quantity: req.quantity,
            total_price: unit_price * f64::from(req.quantity),
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        if let Err(publish_err) = self.queue.publish(&order).await {
            error!(
                error = %publish_err,
                ticket_id = req.ticket_id,
                user_id = req.user_id,
                "Failed to publish order envelope, rolling back reservation"
            );

            let inventory = Arc::clone(&self.inventory);
            let (ticket_id, quantity, user_id) = (req.ticket_id, req.quantity, req.user_id);
            let rollback = tokio::spawn(async move {
                if let Err(e) = inventory.rollback(ticket_id, quantity, user_id).await {
                    error!(
                        error = %e,
                        ticket_id,
                        user_id,
                        "Reservation rollback failed, inventory needs operator attention"
                    );
                }
            });
            // Awaited for ordering, but the spawned task outlives a cancelled
            // caller either way.
            let _ = rollback.await;

            return Err(AppError::Internal("failed to enqueue order".to_string()));
        }

        Ok(order)
    }

    pub async fn order_list(&self) -> Result<Vec<Order>> {
        self.orders.list().await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.orders.find_by_order_id(order_id).await
    }

    /// Confirm a pending order.
    pub async fn confirm_order(&self, order_id: Uuid) -> Result<()> {
        let order = self.orders.find_by_order_id(order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Confirmed) {
            return Err(AppError::InvalidOrderStatus);
        }

        let mut tx = self.pool.begin().await?;
        self.orders
            .update_status_with_lock(&mut tx, order.id, OrderStatus::Confirmed)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Cancel an order and credit its stock back.
    ///
    /// Status flip and stock credit share one transaction: a credited ticket
    /// is never observable without the cancellation.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<()> {
        let order = self.orders.find_by_order_id(order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(AppError::InvalidOrderStatus);
        }

        let mut tx = self.pool.begin().await?;
        let cancelled = self
            .orders
            .update_status_with_lock(&mut tx, order.id, OrderStatus::Cancelled)
            .await?;
        self.tickets
            .increment_stock(&mut tx, cancelled.ticket_id, cancelled.quantity)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Soft-delete an order. No stock adjustment: a deleted-but-uncancelled
    /// order leaves its stock consumed.
    pub async fn delete_order(&self, order_id: Uuid) -> Result<()> {
        let order = self.orders.find_by_order_id(order_id).await?;
        self.orders.delete(order.id).await
    }
}

#[async_trait]
impl OrderDispatcher for OrderService {
    /// Materialize a delivered envelope: insert the order row and decrement
    /// persistent stock in one transaction.
    async fn dispatch_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let created = match self.orders.create(&mut tx, order).await {
            Ok(created) => created,
            Err(AppError::DuplicateRequest) => {
                // At-least-once redelivery of an already-persisted envelope.
                info!(
                    request_id = %order.request_id,
                    "Duplicate request, envelope already persisted"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let ticket = self.tickets.find_by_id(created.ticket_id).await?;

        if let Err(e) = self
            .tickets
            .decrement_stock(&mut tx, ticket.id, created.quantity)
            .await
        {
            if matches!(e, AppError::InsufficientStock) {
                // The durable ledger disagrees with the inventory engine.
                // That means warmup drift; discard via the retry budget and
                // leave the rest to the operator.
                warn!(
                    request_id = %order.request_id,
                    ticket_id = ticket.id,
                    quantity = created.quantity,
                    "Persistent stock insufficient for an admitted order"
                );
            }
            return Err(e);
        }

        tx.commit().await?;
        Ok(())
    }
}
