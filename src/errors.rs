//! Application error taxonomy.
//!
//! Repositories translate backend-specific absence signals into the typed
//! kinds below and surface raw transport errors unchanged. Services preserve
//! kinds they understand; the only re-mapping happens at the publish/rollback
//! boundary in the order service.

/// Result type for all stampede operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors surfaced by the admission and fulfillment pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("ticket not found")]
    TicketNotFound,

    #[error("event not found")]
    EventNotFound,

    #[error("order not found")]
    OrderNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("insufficient stock")]
    InsufficientStock,

    #[error("exceeds maximum tickets per user")]
    ExceedsMaxPerUser,

    #[error("invalid order status transition")]
    InvalidOrderStatus,

    #[error("invalid input")]
    InvalidInput,

    /// Unique `request_id` collision. The dispatch path treats this as
    /// success: the envelope was already persisted by an earlier delivery.
    #[error("duplicate request")]
    DuplicateRequest,

    #[error("email already exists")]
    DuplicateEmail,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl AppError {
    /// Check whether a database error is a unique-index violation involving
    /// the given column token.
    ///
    /// The backend reports violations as text containing `unique` and the
    /// offending constraint name (e.g. `orders_request_id_key`), so a
    /// substring check on both tokens is the contract callers rely on.
    pub fn is_unique_violation(err: &sqlx::Error, column: &str) -> bool {
        match err {
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_lowercase();
                message.contains("unique") && message.contains(column)
            }
            _ => false,
        }
    }
}
