//! Ticket service.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::model::{Ticket, UpdateTicketParams};
use crate::repository::TicketRepository;

/// Per-user cap bounds enforced on create and update.
const MAX_PER_USER_RANGE: std::ops::RangeInclusive<i32> = 1..=20;

/// CRUD over the ticket catalog.
pub struct TicketService {
    tickets: Arc<dyn TicketRepository>,
}

impl TicketService {
    pub fn new(tickets: Arc<dyn TicketRepository>) -> Self {
        Self { tickets }
    }

    pub async fn list(&self) -> Result<Vec<Ticket>> {
        self.tickets.list().await
    }

    pub async fn get_by_ticket_id(&self, ticket_id: Uuid) -> Result<Ticket> {
        self.tickets.find_by_ticket_id(ticket_id).await
    }

    /// Create a ticket. Assigns the external identifier and opens with the
    /// full stock remaining.
    pub async fn create(
        &self,
        event_id: i32,
        name: String,
        price: f64,
        total_stock: i32,
        max_per_user: i32,
    ) -> Result<Ticket> {
        if price < 0.0 || total_stock < 0 || !MAX_PER_USER_RANGE.contains(&max_per_user) {
            return Err(AppError::InvalidInput);
        }

        let now = Utc::now();
        let ticket = Ticket {
            id: 0,
            ticket_id: Uuid::new_v4(),
            event_id,
            name,
            price,
            total_stock,
            remaining_stock: total_stock,
            max_per_user,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.tickets.create(&ticket).await
    }

    pub async fn update_by_ticket_id(
        &self,
        ticket_id: Uuid,
        params: UpdateTicketParams,
    ) -> Result<Ticket> {
        if let Some(price) = params.price {
            if price < 0.0 {
                return Err(AppError::InvalidInput);
            }
        }
        if let Some(max_per_user) = params.max_per_user {
            if !MAX_PER_USER_RANGE.contains(&max_per_user) {
                return Err(AppError::InvalidInput);
            }
        }

        let ticket = self.tickets.find_by_ticket_id(ticket_id).await?;
        self.tickets.update(ticket.id, params).await
    }

    pub async fn delete_by_ticket_id(&self, ticket_id: Uuid) -> Result<()> {
        let ticket = self.tickets.find_by_ticket_id(ticket_id).await?;
        self.tickets.delete(ticket.id).await
    }
}
