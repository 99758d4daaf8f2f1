//! PostgreSQL ticket repository.

use async_trait::async_trait;
use sea_query::{Expr, Iden, PostgresQueryBuilder, Query};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::TicketRepository;
use crate::errors::{AppError, Result};
use crate::model::{Ticket, UpdateTicketParams};

const TICKET_COLUMNS: &str = "id, ticket_id, event_id, name, price, total_stock, \
                              remaining_stock, max_per_user, created_at, updated_at, deleted_at";

/// Ticket table schema (for dynamically built statements).
#[derive(Iden)]
enum Tickets {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "price"]
    Price,
    #[iden = "max_per_user"]
    MaxPerUser,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "deleted_at"]
    DeletedAt,
}

fn ticket_from_row(row: &PgRow) -> Result<Ticket> {
    Ok(Ticket {
        id: row.try_get("id")?,
        ticket_id: row.try_get("ticket_id")?,
        event_id: row.try_get("event_id")?,
        name: row.try_get("name")?,
        price: row.try_get("price")?,
        total_stock: row.try_get("total_stock")?,
        remaining_stock: row.try_get("remaining_stock")?,
        max_per_user: row.try_get("max_per_user")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// PostgreSQL implementation of [`TicketRepository`].
pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn create(&self, ticket: &Ticket) -> Result<Ticket> {
        let query = format!(
            "INSERT INTO tickets \
               (ticket_id, event_id, name, price, total_stock, remaining_stock, max_per_user) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {TICKET_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(ticket.ticket_id)
            .bind(ticket.event_id)
            .bind(&ticket.name)
            .bind(ticket.price)
            .bind(ticket.total_stock)
            .bind(ticket.remaining_stock)
            .bind(ticket.max_per_user)
            .fetch_one(&self.pool)
            .await?;

        ticket_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Ticket>> {
        let query = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE deleted_at IS NULL \
             ORDER BY created_at DESC"
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(ticket_from_row).collect()
    }

    async fn list_by_event_id(&self, event_id: i32) -> Result<Vec<Ticket>> {
        let query = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE event_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC"
        );

        let rows = sqlx::query(&query)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ticket_from_row).collect()
    }

    async fn find_by_id(&self, id: i32) -> Result<Ticket> {
        let query = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE id = $1 AND deleted_at IS NULL"
        );

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::TicketNotFound)?;
        ticket_from_row(&row)
    }

    async fn find_by_ticket_id(&self, ticket_id: Uuid) -> Result<Ticket> {
        let query = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE ticket_id = $1 AND deleted_at IS NULL"
        );

        let row = sqlx::query(&query)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::TicketNotFound)?;
        ticket_from_row(&row)
    }

    async fn update(&self, id: i32, params: UpdateTicketParams) -> Result<Ticket> {
        if params.is_empty() {
            return Err(AppError::InvalidInput);
        }

        let query = {
            let mut stmt = Query::update();
            stmt.table(Tickets::Table);
            if let Some(name) = params.name {
                stmt.value(Tickets::Name, name);
            }
            if let Some(price) = params.price {
                stmt.value(Tickets::Price, price);
            }
            if let Some(max_per_user) = params.max_per_user {
                stmt.value(Tickets::MaxPerUser, max_per_user);
            }
            stmt.value(Tickets::UpdatedAt, Expr::current_timestamp())
                .and_where(Expr::col(Tickets::Id).eq(id))
                .and_where(Expr::col(Tickets::DeletedAt).is_null())
                .returning_all();

            stmt.to_string(PostgresQueryBuilder)
        };

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::TicketNotFound)?;
        ticket_from_row(&row)
    }

    async fn delete(&self, id: i32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tickets \
             SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::TicketNotFound);
        }
        Ok(())
    }

    async fn find_by_id_with_lock(&self, tx: &mut PgConnection, id: i32) -> Result<Ticket> {
        let query = format!(
            "SELECT {TICKET_COLUMNS} FROM tickets \
             WHERE id = $1 AND deleted_at IS NULL \
             FOR UPDATE"
        );

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::TicketNotFound)?;
        ticket_from_row(&row)
    }

    async fn increment_stock(&self, tx: &mut PgConnection, id: i32, quantity: i32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tickets \
             SET remaining_stock = remaining_stock + $1, updated_at = NOW() \
             WHERE id = $2",
        )
        .bind(quantity)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::TicketNotFound);
        }
        Ok(())
    }

    async fn decrement_stock(&self, tx: &mut PgConnection, id: i32, quantity: i32) -> Result<()> {
        // The predicate makes the decrement its own guard; splitting this
        // into read-then-write would reintroduce the oversell race.
        let result = sqlx::query(
            "UPDATE tickets \
             SET remaining_stock = remaining_stock - $1, updated_at = NOW() \
             WHERE id = $2 AND remaining_stock >= $1",
        )
        .bind(quantity)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::InsufficientStock);
        }
        Ok(())
    }

    async fn add_stock(&self, tx: &mut PgConnection, id: i32, quantity: i32) -> Result<()> {
        if quantity <= 0 {
            return Err(AppError::InvalidInput);
        }

        let result = sqlx::query(
            "UPDATE tickets \
             SET total_stock = total_stock + $1, \
                 remaining_stock = remaining_stock + $1, \
                 updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL",
        )
        .bind(quantity)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::TicketNotFound);
        }
        Ok(())
    }
}
