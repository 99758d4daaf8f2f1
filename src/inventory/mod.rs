//! In-memory inventory engine.
//!
//! The admission gate of the pipeline: stock checks, per-user caps and their
//! mutations execute atomically against a fast KV store, independent of the
//! durable relational ledger. This module contains:
//! - `TicketInventory` trait: warmup, reads, atomic reserve and rollback
//! - `RedisTicketInventory`: production implementation over server-side scripts
//! - `MemoryTicketInventory`: in-process implementation for tests

use async_trait::async_trait;

use crate::errors::Result;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryTicketInventory;
pub use self::redis::RedisTicketInventory;

/// The cached inventory triple for one ticket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TicketInfo {
    pub stock: i32,
    pub price: f64,
    pub limit: i32,
}

/// Key of the per-ticket info hash (`stock`, `price`, `limit` fields).
pub(crate) fn info_key(ticket_id: i32) -> String {
    format!("ticket:{ticket_id}:info")
}

/// Key of the per-ticket purchase-count hash (user id -> quantity bought).
pub(crate) fn users_key(ticket_id: i32) -> String {
    format!("ticket:{ticket_id}:users")
}

/// Atomic stock reservation with per-user quota enforcement.
///
/// Reserve and rollback each execute as one indivisible unit at the storage
/// engine; a check-then-write split would race under concurrency and
/// oversell.
#[async_trait]
pub trait TicketInventory: Send + Sync {
    /// Seed (or overwrite) the inventory entry for a ticket.
    async fn warm_up(&self, ticket_id: i32, stock: i32, price: f64, limit: i32) -> Result<()>;

    /// Current stock. `TicketNotFound` if the entry was never warmed.
    async fn stock(&self, ticket_id: i32) -> Result<i32>;

    /// Full inventory triple. `TicketNotFound` if the entry was never warmed.
    async fn info(&self, ticket_id: i32) -> Result<TicketInfo>;

    /// Atomically reserve `quantity` units for `user_id`.
    ///
    /// Returns the unit price on success. Rejections:
    /// `TicketNotFound` (entry absent), `InsufficientStock`,
    /// `ExceedsMaxPerUser`. A rejection leaves stock and the per-user
    /// counter untouched.
    async fn reserve(&self, ticket_id: i32, quantity: i32, user_id: i32) -> Result<f64>;

    /// Atomically revert a prior successful reserve.
    ///
    /// Best-effort corrective: does not clamp and does not report absence.
    /// Callers must only pass quantities previously granted by `reserve`.
    async fn rollback(&self, ticket_id: i32, quantity: i32, user_id: i32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(info_key(42), "ticket:42:info");
        assert_eq!(users_key(42), "ticket:42:users");
    }
}
