//! PostgreSQL user repository.

use async_trait::async_trait;
use sea_query::{Expr, Iden, PostgresQueryBuilder, Query};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::UserRepository;
use crate::errors::{AppError, Result};
use crate::model::user::UpdateUserParams;
use crate::model::User;

const USER_COLUMNS: &str = "id, name, email, created_at, updated_at, deleted_at";

/// User table schema (for dynamically built statements).
#[derive(Iden)]
enum Users {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "updated_at"]
    UpdatedAt,
    #[iden = "deleted_at"]
    DeletedAt,
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

/// PostgreSQL implementation of [`UserRepository`].
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: &User) -> Result<User> {
        let query = format!(
            "INSERT INTO users (name, email) \
             VALUES ($1, $2) \
             RETURNING {USER_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(&user.name)
            .bind(&user.email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if AppError::is_unique_violation(&e, "email") {
                    AppError::DuplicateEmail
                } else {
                    e.into()
                }
            })?;
        user_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE deleted_at IS NULL \
             ORDER BY created_at DESC"
        );

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn find_by_id(&self, id: i32) -> Result<User> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE id = $1 AND deleted_at IS NULL"
        );

        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::UserNotFound)?;
        user_from_row(&row)
    }

    async fn find_by_email(&self, email: &str) -> Result<User> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE email = $1 AND deleted_at IS NULL"
        );

        let row = sqlx::query(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::UserNotFound)?;
        user_from_row(&row)
    }

    async fn update(&self, id: i32, params: UpdateUserParams) -> Result<User> {
        let Some(name) = params.name else {
            return Err(AppError::InvalidInput);
        };

        let query = {
            let mut stmt = Query::update();
            stmt.table(Users::Table)
                .value(Users::Name, name)
                .value(Users::UpdatedAt, Expr::current_timestamp())
                .and_where(Expr::col(Users::Id).eq(id))
                .and_where(Expr::col(Users::DeletedAt).is_null())
                .returning_all();

            stmt.to_string(PostgresQueryBuilder)
        };

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::UserNotFound)?;
        user_from_row(&row)
    }

    async fn delete(&self, id: i32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users \
             SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::UserNotFound);
        }
        Ok(())
    }
}
