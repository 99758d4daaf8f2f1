//! Shared integration-test infrastructure.
//!
//! Spins up Redis and PostgreSQL in containers using testcontainers-rs.
//! No manual service setup required.

#![allow(dead_code)]

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use uuid::Uuid;

use stampede::model::{Order, OrderStatus, Ticket};
use stampede::repository::TicketRepository;

/// Start a Redis container.
///
/// Returns (container, connection manager); the container must stay alive
/// for the duration of the test.
pub async fn start_redis() -> (ContainerAsync<GenericImage>, ConnectionManager) {
    let image = GenericImage::new("redis", "7")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));

    let container = image
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start redis container");

    let host_port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get mapped port");
    let host = container.get_host().await.expect("Failed to get host");

    let url = format!("redis://{host}:{host_port}");
    let client = redis::Client::open(url.as_str()).expect("Failed to open redis client");
    let conn = ConnectionManager::new(client)
        .await
        .expect("Failed to connect to redis");

    (container, conn)
}

/// Start a PostgreSQL container with the stampede schema applied.
pub async fn start_postgres() -> (ContainerAsync<GenericImage>, PgPool) {
    let image = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ));

    let container = image
        .with_env_var("POSTGRES_USER", "postgres")
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "stampede_test")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");

    let host_port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get mapped port");
    let host = container.get_host().await.expect("Failed to get host");

    let uri = format!("postgres://postgres:postgres@{host}:{host_port}/stampede_test");
    let pool = connect_with_retry(&uri).await;

    stampede::database::schema::init_schema(&pool)
        .await
        .expect("Failed to initialize schema");

    (container, pool)
}

/// The container restarts once during init, so the first connection attempts
/// can race it; retry until the server stays up.
async fn connect_with_retry(uri: &str) -> PgPool {
    for _ in 0..30 {
        let pool = PgPoolOptions::new().max_connections(10).connect(uri).await;
        if let Ok(pool) = pool {
            if sqlx::query("SELECT 1").execute(&pool).await.is_ok() {
                return pool;
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("Postgres did not become ready at {uri}");
}

/// Insert a ticket row and return it.
pub async fn seed_ticket(pool: &PgPool, total_stock: i32, max_per_user: i32, price: f64) -> Ticket {
    let repo = stampede::repository::PgTicketRepository::new(pool.clone());

    let now = Utc::now();
    repo.create(&Ticket {
        id: 0,
        ticket_id: Uuid::new_v4(),
        event_id: 1,
        name: "General Admission".to_string(),
        price,
        total_stock,
        remaining_stock: total_stock,
        max_per_user,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    })
    .await
    .expect("Failed to seed ticket")
}

/// Build a pending order envelope for tests.
pub fn pending_order(ticket_id: i32, user_id: i32, quantity: i32, unit_price: f64) -> Order {
    let now = Utc::now();
    Order {
        id: 0,
        order_id: Uuid::new_v4(),
        request_id: Uuid::new_v4().to_string(),
        user_id,
        ticket_id,
        quantity,
        total_price: unit_price * f64::from(quantity),
        status: OrderStatus::Pending,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}
