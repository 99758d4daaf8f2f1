//! Order worker binary.
//!
//! Connects to PostgreSQL and Redis, wires the fulfillment pipeline and
//! consumes order envelopes until interrupted.

use std::sync::Arc;

use tracing::info;

use stampede::bootstrap::init_tracing;
use stampede::database;
use stampede::inventory::RedisTicketInventory;
use stampede::queue::RedisStreamOrderQueue;
use stampede::repository::{PgOrderRepository, PgTicketRepository};
use stampede::service::OrderService;
use stampede::worker::OrderWorker;
use stampede::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load()?;

    let pool = database::connect_postgres(&config.database).await?;
    let redis = database::connect_redis(&config.redis).await?;

    let orders = Arc::new(PgOrderRepository::new(pool.clone()));
    let tickets = Arc::new(PgTicketRepository::new(pool.clone()));
    let inventory = Arc::new(RedisTicketInventory::new(redis.clone()));
    let queue = Arc::new(
        RedisStreamOrderQueue::new(redis, "", config.queue.to_queue_config()).await?,
    );

    let service = Arc::new(OrderService::new(pool, orders, tickets, inventory, queue.clone()));

    let worker = OrderWorker::new(service, queue);
    let handle = worker.start().await?;
    info!("Stampede worker running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    handle.stop();
    handle.join().await;
    Ok(())
}
