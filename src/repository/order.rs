//! PostgreSQL order repository.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use super::OrderRepository;
use crate::errors::{AppError, Result};
use crate::model::{Order, OrderStatus};

const ORDER_COLUMNS: &str = "id, order_id, request_id, user_id, ticket_id, quantity, \
                             total_price, status, created_at, updated_at, deleted_at";

fn order_from_row(row: &PgRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        request_id: row.try_get("request_id")?,
        user_id: row.try_get("user_id")?,
        ticket_id: row.try_get("ticket_id")?,
        quantity: row.try_get("quantity")?,
        total_price: row.try_get("total_price")?,
        status: OrderStatus::from_str(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// PostgreSQL implementation of [`OrderRepository`].
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn list(&self) -> Result<Vec<Order>> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE deleted_at IS NULL \
             ORDER BY created_at DESC"
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn find_by_id(&self, id: i32) -> Result<Order> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE id = $1 AND deleted_at IS NULL"
        );

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::OrderNotFound)?;
        order_from_row(&row)
    }

    async fn find_by_order_id(&self, order_id: Uuid) -> Result<Order> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE order_id = $1 AND deleted_at IS NULL"
        );

        let row = sqlx::query(&query)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::OrderNotFound)?;
        order_from_row(&row)
    }

    async fn find_by_user_id(&self, user_id: i32) -> Result<Vec<Order>> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC"
        );

        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn find_by_ticket_id(&self, ticket_id: i32) -> Result<Vec<Order>> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ticket_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC"
        );

        let rows = sqlx::query(&query)
            .bind(ticket_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn delete(&self, id: i32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE orders \
             SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::OrderNotFound);
        }
        Ok(())
    }

    async fn create(&self, tx: &mut PgConnection, order: &Order) -> Result<Order> {
        let query = format!(
            "INSERT INTO orders \
               (order_id, request_id, user_id, ticket_id, quantity, total_price, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {ORDER_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(order.order_id)
            .bind(&order.request_id)
            .bind(order.user_id)
            .bind(order.ticket_id)
            .bind(order.quantity)
            .bind(order.total_price)
            .bind(order.status.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if AppError::is_unique_violation(&e, "request_id") {
                    AppError::DuplicateRequest
                } else {
                    e.into()
                }
            })?;

        order_from_row(&row)
    }

    async fn update_status_with_lock(
        &self,
        tx: &mut PgConnection,
        id: i32,
        status: OrderStatus,
    ) -> Result<Order> {
        let query = format!(
            "UPDATE orders \
             SET status = $1, updated_at = NOW() \
             WHERE id = $2 AND deleted_at IS NULL \
             RETURNING {ORDER_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(status.as_str())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::OrderNotFound)?;
        order_from_row(&row)
    }

    async fn get_user_ticket_order_count(
        &self,
        tx: &mut PgConnection,
        user_id: i32,
        ticket_id: i32,
    ) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(quantity), 0) AS total_quantity \
             FROM orders \
             WHERE user_id = $1 \
               AND ticket_id = $2 \
               AND status != $3 \
               AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(ticket_id)
        .bind(OrderStatus::Cancelled.as_str())
        .fetch_one(&mut *tx)
        .await?;

        Ok(row.try_get("total_quantity")?)
    }
}
