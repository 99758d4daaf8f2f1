//! PostgreSQL event repository.

use async_trait::async_trait;
use sea_query::{Expr, Iden, PostgresQueryBuilder, Query};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::EventRepository;
use crate::errors::{AppError, Result};
use crate::model::{Event, UpdateEventParams};

const EVENT_COLUMNS: &str = "id, event_id, name, description, created_at, updated_at";

/// Event table schema (for dynamically built statements).
#[derive(Iden)]
enum Events {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "description"]
    Description,
    #[iden = "updated_at"]
    UpdatedAt,
}

fn event_from_row(row: &PgRow) -> Result<Event> {
    Ok(Event {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// PostgreSQL implementation of [`EventRepository`].
pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn create(&self, event: &Event) -> Result<Event> {
        let query = format!(
            "INSERT INTO events (event_id, name, description) \
             VALUES ($1, $2, $3) \
             RETURNING {EVENT_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(event.event_id)
            .bind(&event.name)
            .bind(&event.description)
            .fetch_one(&self.pool)
            .await?;
        event_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Event>> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             ORDER BY created_at DESC"
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn find_by_id(&self, id: i32) -> Result<Event> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::EventNotFound)?;
        event_from_row(&row)
    }

    async fn find_by_event_id(&self, event_id: Uuid) -> Result<Event> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1");

        let row = sqlx::query(&query)
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::EventNotFound)?;
        event_from_row(&row)
    }

    async fn update(&self, id: i32, params: UpdateEventParams) -> Result<Event> {
        if params.name.is_none() && params.description.is_none() {
            return Err(AppError::InvalidInput);
        }

        let query = {
            let mut stmt = Query::update();
            stmt.table(Events::Table);
            if let Some(name) = params.name {
                stmt.value(Events::Name, name);
            }
            if let Some(description) = params.description {
                stmt.value(Events::Description, description);
            }
            stmt.value(Events::UpdatedAt, Expr::current_timestamp())
                .and_where(Expr::col(Events::Id).eq(id))
                .returning_all();

            stmt.to_string(PostgresQueryBuilder)
        };

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::EventNotFound)?;
        event_from_row(&row)
    }
}
