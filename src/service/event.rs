//! Event service.
//!
//! Catalog CRUD plus the sale-opening warmup that seeds the inventory engine
//! from the durable ticket rows.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::errors::Result;
use crate::inventory::TicketInventory;
use crate::model::{Event, UpdateEventParams};
use crate::repository::{EventRepository, TicketRepository};

pub struct EventService {
    events: Arc<dyn EventRepository>,
    tickets: Arc<dyn TicketRepository>,
    inventory: Arc<dyn TicketInventory>,
}

impl EventService {
    pub fn new(
        events: Arc<dyn EventRepository>,
        tickets: Arc<dyn TicketRepository>,
        inventory: Arc<dyn TicketInventory>,
    ) -> Self {
        Self {
            events,
            tickets,
            inventory,
        }
    }

    pub async fn list(&self) -> Result<Vec<Event>> {
        self.events.list().await
    }

    pub async fn get_by_event_id(&self, event_id: Uuid) -> Result<Event> {
        self.events.find_by_event_id(event_id).await
    }

    pub async fn create(&self, name: String, description: Option<String>) -> Result<Event> {
        let now = Utc::now();
        let event = Event {
            id: 0,
            event_id: Uuid::new_v4(),
            name,
            description,
            created_at: now,
            updated_at: now,
        };
        self.events.create(&event).await
    }

    pub async fn update_by_event_id(
        &self,
        event_id: Uuid,
        params: UpdateEventParams,
    ) -> Result<Event> {
        let event = self.events.find_by_event_id(event_id).await?;
        self.events.update(event.id, params).await
    }

    /// Open an event for sale: warm every ticket of the event into the
    /// inventory engine so admission runs against the fast path.
    pub async fn open_for_sale(&self, event_id: Uuid) -> Result<()> {
        let event = self.events.find_by_event_id(event_id).await?;
        let tickets = self.tickets.list_by_event_id(event.id).await?;

        for ticket in &tickets {
            self.inventory
                .warm_up(
                    ticket.id,
                    ticket.total_stock,
                    ticket.price,
                    ticket.max_per_user,
                )
                .await?;
        }

        info!(
            event_id = %event_id,
            tickets = tickets.len(),
            "Event opened for sale"
        );
        Ok(())
    }
}
