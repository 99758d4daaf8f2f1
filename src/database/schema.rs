//! Relational schema bootstrap.
//!
//! Creates the tables and indexes the repositories expect. Production
//! deployments manage the schema externally; this bootstrap backs the
//! integration suites and local development.

use sea_query::{Alias, ColumnDef, Expr, Iden, Index, PostgresQueryBuilder, Table};
use sqlx::PgPool;
use tracing::info;

use crate::errors::Result;

#[derive(Iden)]
enum Events {
    Table,
    Id,
    EventId,
    Name,
    Description,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Users {
    Table,
    Id,
    Name,
    Email,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
enum Tickets {
    Table,
    Id,
    TicketId,
    EventId,
    Name,
    Price,
    TotalStock,
    RemainingStock,
    MaxPerUser,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
enum Orders {
    Table,
    Id,
    OrderId,
    RequestId,
    UserId,
    TicketId,
    Quantity,
    TotalPrice,
    Status,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

/// Create all tables and indexes if absent.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    let events = Table::create()
        .table(Events::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Events::Id)
                .integer()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(Events::EventId).uuid().not_null().unique_key())
        .col(ColumnDef::new(Events::Name).text().not_null())
        .col(ColumnDef::new(Events::Description).text())
        .col(
            ColumnDef::new(Events::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Events::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .to_string(PostgresQueryBuilder);
    sqlx::query(&events).execute(pool).await?;

    let users = Table::create()
        .table(Users::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Users::Id)
                .integer()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(Users::Name).text().not_null())
        .col(ColumnDef::new(Users::Email).text().not_null().unique_key())
        .col(
            ColumnDef::new(Users::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Users::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(ColumnDef::new(Users::DeletedAt).timestamp_with_time_zone())
        .to_string(PostgresQueryBuilder);
    sqlx::query(&users).execute(pool).await?;

    let tickets = Table::create()
        .table(Tickets::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Tickets::Id)
                .integer()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(Tickets::TicketId)
                .uuid()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Tickets::EventId).integer().not_null())
        .col(ColumnDef::new(Tickets::Name).text().not_null())
        .col(ColumnDef::new(Tickets::Price).double().not_null())
        .col(ColumnDef::new(Tickets::TotalStock).integer().not_null())
        .col(
            ColumnDef::new(Tickets::RemainingStock)
                .integer()
                .not_null()
                .check(Expr::col(Tickets::RemainingStock).gte(0)),
        )
        .col(ColumnDef::new(Tickets::MaxPerUser).integer().not_null())
        .col(
            ColumnDef::new(Tickets::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Tickets::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(ColumnDef::new(Tickets::DeletedAt).timestamp_with_time_zone())
        .to_string(PostgresQueryBuilder);
    sqlx::query(&tickets).execute(pool).await?;

    let orders = Table::create()
        .table(Orders::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(Orders::Id)
                .integer()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(Orders::OrderId).uuid().not_null().unique_key())
        // The unique key on request_id is what makes dispatch idempotent.
        .col(
            ColumnDef::new(Orders::RequestId)
                .text()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(Orders::UserId).integer().not_null())
        .col(ColumnDef::new(Orders::TicketId).integer().not_null())
        .col(
            ColumnDef::new(Orders::Quantity)
                .integer()
                .not_null()
                .check(Expr::col(Orders::Quantity).gte(1)),
        )
        .col(ColumnDef::new(Orders::TotalPrice).double().not_null())
        .col(ColumnDef::new(Orders::Status).text().not_null())
        .col(
            ColumnDef::new(Orders::CreatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Orders::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(ColumnDef::new(Orders::DeletedAt).timestamp_with_time_zone())
        .to_string(PostgresQueryBuilder);
    sqlx::query(&orders).execute(pool).await?;

    for (name, table, column) in [
        ("idx_tickets_event_id", "tickets", "event_id"),
        ("idx_orders_user_id", "orders", "user_id"),
        ("idx_orders_ticket_id", "orders", "ticket_id"),
    ] {
        let index = Index::create()
            .if_not_exists()
            .name(name)
            .table(Alias::new(table))
            .col(Alias::new(column))
            .to_string(PostgresQueryBuilder);
        sqlx::query(&index).execute(pool).await?;
    }

    info!("Relational schema initialized");
    Ok(())
}
