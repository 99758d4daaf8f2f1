//! Ticket model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A ticket type with bounded stock.
///
/// Invariant: `0 <= remaining_stock <= total_stock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i32,
    pub ticket_id: Uuid,
    pub event_id: i32,
    pub name: String,
    pub price: f64,
    pub total_stock: i32,
    pub remaining_stock: i32,
    pub max_per_user: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Ticket {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// A ticket can be purchased while it is live and has stock left.
    pub fn is_available(&self) -> bool {
        !self.is_deleted() && self.remaining_stock > 0
    }
}

/// Partial update for a ticket. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateTicketParams {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub max_per_user: Option<i32>,
}

impl UpdateTicketParams {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.price.is_none() && self.max_per_user.is_none()
    }
}
