//! In-process inventory engine.
//!
//! Mirrors the rejection semantics of the Redis scripts with a single mutex
//! as the atomic domain. Used by unit tests and in-process worker tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{TicketInfo, TicketInventory};
use crate::errors::{AppError, Result};

#[derive(Default)]
struct Inner {
    entries: HashMap<i32, TicketInfo>,
    /// (ticket_id, user_id) -> quantity bought.
    purchases: HashMap<(i32, i32), i32>,
}

/// Hash-map implementation of the inventory engine.
#[derive(Default)]
pub struct MemoryTicketInventory {
    inner: Mutex<Inner>,
}

impl MemoryTicketInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity bought so far by a user, for test assertions.
    pub async fn purchased(&self, ticket_id: i32, user_id: i32) -> i32 {
        let inner = self.inner.lock().await;
        inner.purchases.get(&(ticket_id, user_id)).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TicketInventory for MemoryTicketInventory {
    async fn warm_up(&self, ticket_id: i32, stock: i32, price: f64, limit: i32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.entries.insert(ticket_id, TicketInfo { stock, price, limit });
        Ok(())
    }

    async fn stock(&self, ticket_id: i32) -> Result<i32> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(&ticket_id)
            .map(|info| info.stock)
            .ok_or(AppError::TicketNotFound)
    }

    async fn info(&self, ticket_id: i32) -> Result<TicketInfo> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(&ticket_id)
            .copied()
            .ok_or(AppError::TicketNotFound)
    }

    async fn reserve(&self, ticket_id: i32, quantity: i32, user_id: i32) -> Result<f64> {
        let mut inner = self.inner.lock().await;

        let info = *inner.entries.get(&ticket_id).ok_or(AppError::TicketNotFound)?;
        if info.stock < quantity {
            return Err(AppError::InsufficientStock);
        }

        let bought = inner.purchases.get(&(ticket_id, user_id)).copied().unwrap_or(0);
        if bought + quantity > info.limit {
            return Err(AppError::ExceedsMaxPerUser);
        }

        if let Some(entry) = inner.entries.get_mut(&ticket_id) {
            entry.stock -= quantity;
        }
        *inner.purchases.entry((ticket_id, user_id)).or_insert(0) += quantity;
        Ok(info.price)
    }

    async fn rollback(&self, ticket_id: i32, quantity: i32, user_id: i32) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(info) = inner.entries.get_mut(&ticket_id) {
            info.stock += quantity;
        }
        *inner.purchases.entry((ticket_id, user_id)).or_insert(0) -= quantity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_reserve_success_returns_price() {
        let inventory = MemoryTicketInventory::new();
        inventory.warm_up(1, 10, 25.5, 4).await.unwrap();

        let price = inventory.reserve(1, 2, 7).await.unwrap();
        assert_eq!(price, 25.5);
        assert_eq!(inventory.stock(1).await.unwrap(), 8);
        assert_eq!(inventory.purchased(1, 7).await, 2);
    }

    #[tokio::test]
    async fn test_reserve_rejections_leave_state_unchanged() {
        let inventory = MemoryTicketInventory::new();
        inventory.warm_up(1, 3, 10.0, 2).await.unwrap();

        // Not warmed.
        assert!(matches!(
            inventory.reserve(2, 1, 7).await,
            Err(AppError::TicketNotFound)
        ));

        // More than stock.
        assert!(matches!(
            inventory.reserve(1, 4, 7).await,
            Err(AppError::InsufficientStock)
        ));

        // Over the per-user cap.
        assert!(matches!(
            inventory.reserve(1, 3, 7).await,
            Err(AppError::ExceedsMaxPerUser)
        ));

        assert_eq!(inventory.stock(1).await.unwrap(), 3);
        assert_eq!(inventory.purchased(1, 7).await, 0);
    }

    #[tokio::test]
    async fn test_reserve_rollback_neutrality() {
        let inventory = MemoryTicketInventory::new();
        inventory.warm_up(1, 10, 5.0, 5).await.unwrap();

        inventory.reserve(1, 3, 9).await.unwrap();
        inventory.rollback(1, 3, 9).await.unwrap();

        assert_eq!(inventory.stock(1).await.unwrap(), 10);
        assert_eq!(inventory.purchased(1, 9).await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_reserves_never_oversell() {
        let inventory = Arc::new(MemoryTicketInventory::new());
        inventory.warm_up(1, 10, 1.0, 1).await.unwrap();

        let mut handles = Vec::new();
        for user_id in 0..100 {
            let inventory = Arc::clone(&inventory);
            handles.push(tokio::spawn(async move {
                inventory.reserve(1, 1, user_id).await.is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 10);
        assert_eq!(inventory.stock(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_per_user_cap_across_requests() {
        let inventory = Arc::new(MemoryTicketInventory::new());
        inventory.warm_up(1, 100, 2.0, 2).await.unwrap();

        assert!(inventory.reserve(1, 2, 5).await.is_ok());
        assert!(matches!(
            inventory.reserve(1, 1, 5).await,
            Err(AppError::ExceedsMaxPerUser)
        ));

        assert_eq!(inventory.stock(1).await.unwrap(), 98);
        assert_eq!(inventory.purchased(1, 5).await, 2);
    }
}
