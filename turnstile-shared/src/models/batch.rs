use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ticket::IndividualTicket;

/// Event metadata supplied by the organizer when creating a batch.
///
/// Scheduling fields are free-form strings; only non-emptiness is checked.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventDetails {
    pub title: String,
    pub description: Option<String>,
    pub event_date: String,
    pub start_time: String,
    pub end_time: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub venue_name: Option<String>,
    pub competition: Option<String>,
}

/// One pricing tier as requested, before the store assigns it an id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierInput {
    pub name: String,
    pub price: f64,
    pub quantity: u32,
    pub description: Option<String>,
}

impl TierInput {
    pub fn new(name: impl Into<String>, price: f64, quantity: u32) -> Self {
        Self {
            name: name.into(),
            price,
            quantity,
            description: None,
        }
    }

    /// Revenue if every ticket in the tier is sold
    pub fn revenue(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// A batch creation request: event details plus tiers in declaration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub owner_id: String,
    pub details: EventDetails,
    pub tiers: Vec<TierInput>,
}

/// One created event listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventBatch {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub description: Option<String>,
    pub event_date: String,
    pub start_time: String,
    pub end_time: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub venue_name: Option<String>,
    pub competition: Option<String>,
    /// Quantity-weighted mean of tier prices
    pub price: f64,
    /// Sum of tier quantities as requested (not the persisted ticket count)
    pub quantity: u32,
    pub document_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventBatch {
    /// Upper-cased first eight hex digits of the id, used to scope ticket codes
    pub fn code_prefix(&self) -> String {
        self.id.simple().to_string()[..8].to_uppercase()
    }
}

/// One tier row within a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricingTier {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub name: String,
    pub price: f64,
    pub quantity: u32,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A batch eager-loaded with its tiers and tickets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDetail {
    pub batch: EventBatch,
    pub tiers: Vec<PricingTier>,
    pub tickets: Vec<IndividualTicket>,
}

impl BatchDetail {
    pub fn used_count(&self) -> usize {
        self.tickets.iter().filter(|t| t.is_used).count()
    }

    pub fn tier_name(&self, tier_id: Uuid) -> Option<&str> {
        self.tiers
            .iter()
            .find(|t| t.id == tier_id)
            .map(|t| t.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_prefix_is_uppercase_hex() {
        let batch = EventBatch {
            id: Uuid::parse_str("3f2a9c1e-0000-4000-8000-000000000000").unwrap(),
            owner_id: "owner-1".to_string(),
            title: "Derby".to_string(),
            description: None,
            event_date: "2026-11-01".to_string(),
            start_time: "18:00".to_string(),
            end_time: "20:00".to_string(),
            home_team: None,
            away_team: None,
            venue_name: None,
            competition: None,
            price: 10.0,
            quantity: 1,
            document_url: None,
            created_at: Utc::now(),
        };

        assert_eq!(batch.code_prefix(), "3F2A9C1E");
    }

    #[test]
    fn test_tier_revenue() {
        let tier = TierInput::new("VIP", 100.0, 2);
        assert_eq!(tier.revenue(), 200.0);
    }
}
