//! Persistence repositories.
//!
//! All authoritative durable state lives behind these traits. Operations are
//! grouped by lock discipline: pool-level reads run on the shared connection
//! pool; transaction-scoped mutations take the caller's open connection and
//! never commit; owning the transaction boundary is the service's job.
//!
//! Implementations:
//! - `PgTicketRepository` / `PgOrderRepository` / `PgEventRepository` /
//!   `PgUserRepository`: PostgreSQL via sqlx

use async_trait::async_trait;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::errors::Result;
use crate::model::user::UpdateUserParams;
use crate::model::{
    Event, Order, OrderStatus, Ticket, UpdateEventParams, UpdateTicketParams, User,
};

pub mod event;
pub mod order;
pub mod ticket;
pub mod user;

pub use event::PgEventRepository;
pub use order::PgOrderRepository;
pub use ticket::PgTicketRepository;
pub use user::PgUserRepository;

/// Ticket persistence. Soft-deleted rows are invisible to every reader.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn create(&self, ticket: &Ticket) -> Result<Ticket>;
    async fn list(&self) -> Result<Vec<Ticket>>;
    async fn list_by_event_id(&self, event_id: i32) -> Result<Vec<Ticket>>;
    async fn find_by_id(&self, id: i32) -> Result<Ticket>;
    async fn find_by_ticket_id(&self, ticket_id: Uuid) -> Result<Ticket>;
    async fn update(&self, id: i32, params: UpdateTicketParams) -> Result<Ticket>;
    async fn delete(&self, id: i32) -> Result<()>;

    /// Row-level exclusive read; blocks on concurrent writers.
    async fn find_by_id_with_lock(&self, tx: &mut PgConnection, id: i32) -> Result<Ticket>;

    /// Credit stock back. Zero affected rows maps to `TicketNotFound`.
    async fn increment_stock(&self, tx: &mut PgConnection, id: i32, quantity: i32) -> Result<()>;

    /// Guarded decrement in a single UPDATE (`remaining_stock >= quantity`).
    /// Zero affected rows maps to `InsufficientStock`. This is the
    /// authoritative oversell guard on the durable side.
    async fn decrement_stock(&self, tx: &mut PgConnection, id: i32, quantity: i32) -> Result<()>;

    /// Raise both total and remaining stock. Non-positive quantity is
    /// `InvalidInput`.
    async fn add_stock(&self, tx: &mut PgConnection, id: i32, quantity: i32) -> Result<()>;
}

/// Order persistence.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Order>>;
    async fn find_by_id(&self, id: i32) -> Result<Order>;
    async fn find_by_order_id(&self, order_id: Uuid) -> Result<Order>;
    async fn find_by_user_id(&self, user_id: i32) -> Result<Vec<Order>>;
    async fn find_by_ticket_id(&self, ticket_id: i32) -> Result<Vec<Order>>;
    async fn delete(&self, id: i32) -> Result<()>;

    /// Insert an order row. A unique-index collision on `request_id` maps to
    /// `DuplicateRequest`.
    async fn create(&self, tx: &mut PgConnection, order: &Order) -> Result<Order>;

    /// Status update with RETURNING. Zero rows maps to `OrderNotFound`.
    /// Legal-transition checks belong to the service.
    async fn update_status_with_lock(
        &self,
        tx: &mut PgConnection,
        id: i32,
        status: OrderStatus,
    ) -> Result<Order>;

    /// Sum of quantities of non-cancelled, non-deleted orders for a
    /// (user, ticket) pair.
    async fn get_user_ticket_order_count(
        &self,
        tx: &mut PgConnection,
        user_id: i32,
        ticket_id: i32,
    ) -> Result<i64>;
}

/// Event persistence.
#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create(&self, event: &Event) -> Result<Event>;
    async fn list(&self) -> Result<Vec<Event>>;
    async fn find_by_id(&self, id: i32) -> Result<Event>;
    async fn find_by_event_id(&self, event_id: Uuid) -> Result<Event>;
    async fn update(&self, id: i32, params: UpdateEventParams) -> Result<Event>;
}

/// User persistence.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<User>;
    async fn list(&self) -> Result<Vec<User>>;
    async fn find_by_id(&self, id: i32) -> Result<User>;
    async fn find_by_email(&self, email: &str) -> Result<User>;
    async fn update(&self, id: i32, params: UpdateUserParams) -> Result<User>;
    async fn delete(&self, id: i32) -> Result<()>;
}
