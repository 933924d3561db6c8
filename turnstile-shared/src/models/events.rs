use uuid::Uuid;

use super::batch::{EventBatch, PricingTier};

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BatchIssuedEvent {
    pub batch_id: Uuid,
    pub owner_id: String,
    pub ticket_count: u32,
    pub total_revenue: f64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct TicketValidatedEvent {
    pub ticket_id: Uuid,
    pub batch_id: Uuid,
    pub ticket_number: u32,
    pub validated_at: i64,
}

/// Ticket entry inside the issuance webhook document
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct WebhookTicket {
    pub id: Uuid,
    pub ticket_number: u32,
    pub ticket_code: String,
    pub tier_name: String,
    pub price: f64,
    pub qr_code: String,
    pub seat_section: Option<String>,
    pub seat_row: Option<String>,
    pub seat_number: Option<String>,
}

/// Document POSTed to the external endpoint after a successful issuance
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct IssuanceWebhook {
    pub batch: EventBatch,
    pub tiers: Vec<PricingTier>,
    pub tickets: Vec<WebhookTicket>,
    pub total_revenue: f64,
}

impl IssuanceWebhook {
    pub fn issued_event(&self) -> BatchIssuedEvent {
        BatchIssuedEvent {
            batch_id: self.batch.id,
            owner_id: self.batch.owner_id.clone(),
            ticket_count: self.tickets.len() as u32,
            total_revenue: self.total_revenue,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}
