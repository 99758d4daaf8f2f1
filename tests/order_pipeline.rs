//! End-to-end pipeline tests: real Redis, real PostgreSQL, real worker.
//!
//! Exercises the full reserve -> publish -> dispatch -> commit flow and the
//! compensation / idempotency / cancellation paths around it.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sqlx::PgPool;

use stampede::errors::{AppError, Result};
use stampede::inventory::{RedisTicketInventory, TicketInventory};
use stampede::model::{CreateOrderRequest, Order, OrderStatus};
use stampede::queue::{OrderQueue, QueueConfig, RedisStreamOrderQueue, Subscription};
use stampede::repository::{
    OrderRepository, PgOrderRepository, PgTicketRepository, TicketRepository,
};
use stampede::service::{OrderDispatcher, OrderService};
use stampede::worker::OrderWorker;

fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        claim_min_idle: Duration::from_millis(200),
        max_retry_count: 3,
        read_block: Duration::from_millis(200),
    }
}

struct Pipeline {
    service: Arc<OrderService>,
    queue: Arc<RedisStreamOrderQueue>,
    inventory: Arc<RedisTicketInventory>,
    orders: Arc<PgOrderRepository>,
    tickets: Arc<PgTicketRepository>,
}

async fn build_pipeline(pool: &PgPool, redis: &ConnectionManager) -> Pipeline {
    let orders = Arc::new(PgOrderRepository::new(pool.clone()));
    let tickets = Arc::new(PgTicketRepository::new(pool.clone()));
    let inventory = Arc::new(RedisTicketInventory::new(redis.clone()));
    let queue = Arc::new(
        RedisStreamOrderQueue::new(redis.clone(), "", fast_queue_config())
            .await
            .expect("Failed to create queue"),
    );
    let service = Arc::new(OrderService::new(
        pool.clone(),
        orders.clone(),
        tickets.clone(),
        inventory.clone(),
        queue.clone(),
    ));
    Pipeline {
        service,
        queue,
        inventory,
        orders,
        tickets,
    }
}

/// Poll until `check` returns true or the deadline passes.
async fn wait_until<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test]
async fn test_flash_sale_admits_exactly_the_stock() {
    let (_redis_container, redis) = common::start_redis().await;
    let (_pg_container, pool) = common::start_postgres().await;
    let p = build_pipeline(&pool, &redis).await;

    let ticket = common::seed_ticket(&pool, 10, 1, 30.0).await;
    p.inventory.warm_up(ticket.id, 10, 30.0, 1).await.unwrap();

    let worker = OrderWorker::new(p.service.clone(), p.queue.clone());
    let handle = worker.start().await.unwrap();

    // 100 distinct users race for 10 units.
    let mut requests = Vec::new();
    for user_id in 1..=100 {
        let service = p.service.clone();
        let ticket_id = ticket.id;
        requests.push(tokio::spawn(async move {
            service
                .prepare_order(CreateOrderRequest {
                    user_id,
                    ticket_id,
                    quantity: 1,
                })
                .await
        }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for request in requests {
        match request.await.unwrap() {
            Ok(order) => {
                assert_eq!(order.status, OrderStatus::Pending);
                admitted += 1;
            }
            Err(AppError::InsufficientStock) => rejected += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(admitted, 10);
    assert_eq!(rejected, 90);
    assert_eq!(p.inventory.stock(ticket.id).await.unwrap(), 0);

    // The worker drains the queue into the durable ledger.
    let orders = p.orders.clone();
    let drained = wait_until(Duration::from_secs(15), || {
        let orders = orders.clone();
        async move { orders.list().await.map(|o| o.len() == 10).unwrap_or(false) }
    })
    .await;
    assert!(drained, "worker did not persist all admitted orders in time");

    let persisted = p.tickets.find_by_id(ticket.id).await.unwrap();
    assert_eq!(persisted.remaining_stock, 0);

    handle.stop();
    handle.join().await;
}

#[tokio::test]
async fn test_per_user_cap_on_the_admission_path() {
    let (_redis_container, redis) = common::start_redis().await;
    let (_pg_container, pool) = common::start_postgres().await;
    let p = build_pipeline(&pool, &redis).await;

    let ticket = common::seed_ticket(&pool, 100, 2, 10.0).await;
    p.inventory.warm_up(ticket.id, 100, 10.0, 2).await.unwrap();

    let first = p
        .service
        .prepare_order(CreateOrderRequest {
            user_id: 1,
            ticket_id: ticket.id,
            quantity: 2,
        })
        .await
        .unwrap();
    assert_eq!(first.total_price, 20.0);

    let second = p
        .service
        .prepare_order(CreateOrderRequest {
            user_id: 1,
            ticket_id: ticket.id,
            quantity: 1,
        })
        .await;
    assert!(matches!(second, Err(AppError::ExceedsMaxPerUser)));

    assert_eq!(p.inventory.stock(ticket.id).await.unwrap(), 98);
}

/// Queue stub for simulating a dead broker.
struct BrokenQueue;

#[async_trait]
impl OrderQueue for BrokenQueue {
    async fn publish(&self, _order: &Order) -> Result<()> {
        Err(AppError::Internal("broker down".to_string()))
    }
    async fn subscribe(&self) -> Result<Subscription> {
        Err(AppError::Internal("broker down".to_string()))
    }
}

#[tokio::test]
async fn test_publish_failure_compensates_the_reservation() {
    let (_redis_container, redis) = common::start_redis().await;
    let (_pg_container, pool) = common::start_postgres().await;

    let orders = Arc::new(PgOrderRepository::new(pool.clone()));
    let tickets = Arc::new(PgTicketRepository::new(pool.clone()));
    let inventory = Arc::new(RedisTicketInventory::new(redis.clone()));
    let service = OrderService::new(
        pool.clone(),
        orders.clone(),
        tickets,
        inventory.clone(),
        Arc::new(BrokenQueue),
    );

    let ticket = common::seed_ticket(&pool, 100, 4, 10.0).await;
    inventory.warm_up(ticket.id, 100, 10.0, 4).await.unwrap();

    let result = service
        .prepare_order(CreateOrderRequest {
            user_id: 1,
            ticket_id: ticket.id,
            quantity: 1,
        })
        .await;

    assert!(matches!(result, Err(AppError::Internal(_))));
    assert_eq!(inventory.stock(ticket.id).await.unwrap(), 100);
    assert!(orders.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_dispatch_is_idempotent() {
    let (_redis_container, redis) = common::start_redis().await;
    let (_pg_container, pool) = common::start_postgres().await;
    let p = build_pipeline(&pool, &redis).await;

    let ticket = common::seed_ticket(&pool, 10, 4, 20.0).await;
    let envelope = common::pending_order(ticket.id, 1, 2, 20.0);

    p.service.dispatch_order(&envelope).await.unwrap();
    // Redelivery of the identical envelope must be treated as success.
    p.service.dispatch_order(&envelope).await.unwrap();

    assert_eq!(p.orders.list().await.unwrap().len(), 1);
    assert_eq!(
        p.tickets.find_by_id(ticket.id).await.unwrap().remaining_stock,
        8
    );
}

#[tokio::test]
async fn test_cancel_credits_stock_atomically() {
    let (_redis_container, redis) = common::start_redis().await;
    let (_pg_container, pool) = common::start_postgres().await;
    let p = build_pipeline(&pool, &redis).await;

    let ticket = common::seed_ticket(&pool, 50, 4, 20.0).await;
    let envelope = common::pending_order(ticket.id, 1, 2, 20.0);
    p.service.dispatch_order(&envelope).await.unwrap();
    assert_eq!(
        p.tickets.find_by_id(ticket.id).await.unwrap().remaining_stock,
        48
    );

    p.service.cancel_order(envelope.order_id).await.unwrap();

    let order = p.orders.find_by_order_id(envelope.order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(
        p.tickets.find_by_id(ticket.id).await.unwrap().remaining_stock,
        50
    );

    // Cancelled is terminal.
    assert!(matches!(
        p.service.cancel_order(envelope.order_id).await,
        Err(AppError::InvalidOrderStatus)
    ));
    assert!(matches!(
        p.service.confirm_order(envelope.order_id).await,
        Err(AppError::InvalidOrderStatus)
    ));

    // The credit happened exactly once.
    assert_eq!(
        p.tickets.find_by_id(ticket.id).await.unwrap().remaining_stock,
        50
    );
}

#[tokio::test]
async fn test_cancel_after_confirm_credits_once() {
    let (_redis_container, redis) = common::start_redis().await;
    let (_pg_container, pool) = common::start_postgres().await;
    let p = build_pipeline(&pool, &redis).await;

    let ticket = common::seed_ticket(&pool, 10, 4, 20.0).await;
    let envelope = common::pending_order(ticket.id, 1, 3, 20.0);
    p.service.dispatch_order(&envelope).await.unwrap();

    p.service.confirm_order(envelope.order_id).await.unwrap();
    assert_eq!(
        p.orders
            .find_by_order_id(envelope.order_id)
            .await
            .unwrap()
            .status,
        OrderStatus::Confirmed
    );

    p.service.cancel_order(envelope.order_id).await.unwrap();
    assert_eq!(
        p.tickets.find_by_id(ticket.id).await.unwrap().remaining_stock,
        10
    );
}

#[tokio::test]
async fn test_dispatch_drift_is_discarded_after_retry_budget() {
    let (_redis_container, redis) = common::start_redis().await;
    let (_pg_container, pool) = common::start_postgres().await;
    let p = build_pipeline(&pool, &redis).await;

    // The durable ledger has less stock than the inventory engine believes:
    // dispatch keeps failing on the guarded decrement until the queue drops
    // the envelope as poison.
    let ticket = common::seed_ticket(&pool, 1, 4, 20.0).await;
    let envelope = common::pending_order(ticket.id, 1, 2, 20.0);
    p.queue.publish(&envelope).await.unwrap();

    let worker = OrderWorker::new(p.service.clone(), p.queue.clone());
    let handle = worker.start().await.unwrap();

    // Budget: 3 delivery cycles at 200ms idle each, then discard.
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(p.orders.list().await.unwrap().is_empty());
    assert_eq!(
        p.tickets.find_by_id(ticket.id).await.unwrap().remaining_stock,
        1
    );

    handle.stop();
    handle.join().await;
}
