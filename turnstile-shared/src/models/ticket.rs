use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One physical ticket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndividualTicket {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub tier_id: Uuid,
    /// Position within the batch, contiguous from 1 across all tiers
    pub ticket_number: u32,
    pub ticket_code: String,
    pub qr_payload: String,
    pub qr_image: Option<String>,
    pub is_used: bool,
    pub validated_at: Option<DateTime<Utc>>,
    pub seat_section: Option<String>,
    pub seat_row: Option<String>,
    pub seat_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IndividualTicket {
    /// Does a raw scanned string literally identify this ticket?
    pub fn matches_literal(&self, raw: &str) -> bool {
        self.qr_payload == raw || self.ticket_code == raw || self.id.to_string() == raw
    }

    /// Mark as validated (e.g., scanned at the door)
    pub fn mark_used(&mut self, at: DateTime<Utc>) {
        self.is_used = true;
        self.validated_at = Some(at);
    }
}

/// A ticket row ready to insert.
///
/// `id` is generated client-side and doubles as the idempotency key, so
/// re-sending a chunk never creates duplicate rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTicket {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub tier_id: Uuid,
    pub ticket_number: u32,
    pub ticket_code: String,
    pub qr_payload: String,
    pub qr_image: Option<String>,
    pub seat_section: Option<String>,
    pub seat_row: Option<String>,
    pub seat_number: Option<String>,
}

impl NewTicket {
    pub fn into_ticket(self, created_at: DateTime<Utc>) -> IndividualTicket {
        IndividualTicket {
            id: self.id,
            batch_id: self.batch_id,
            tier_id: self.tier_id,
            ticket_number: self.ticket_number,
            ticket_code: self.ticket_code,
            qr_payload: self.qr_payload,
            qr_image: self.qr_image,
            is_used: false,
            validated_at: None,
            seat_section: self.seat_section,
            seat_row: self.seat_row,
            seat_number: self.seat_number,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IndividualTicket {
        NewTicket {
            id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            tier_id: Uuid::new_v4(),
            ticket_number: 7,
            ticket_code: "TKT-ABCDEF12-000007".to_string(),
            qr_payload: "{\"ticketId\":\"TKT-ABCDEF12-000007\"}".to_string(),
            qr_image: None,
            seat_section: None,
            seat_row: None,
            seat_number: Some("7".to_string()),
        }
        .into_ticket(Utc::now())
    }

    #[test]
    fn test_literal_matching() {
        let ticket = sample();

        assert!(ticket.matches_literal(&ticket.id.to_string()));
        assert!(ticket.matches_literal("TKT-ABCDEF12-000007"));
        assert!(ticket.matches_literal(&ticket.qr_payload.clone()));
        assert!(!ticket.matches_literal("TKT-ABCDEF12-000008"));
    }

    #[test]
    fn test_new_ticket_starts_unused() {
        let mut ticket = sample();
        assert!(!ticket.is_used);
        assert!(ticket.validated_at.is_none());

        let now = Utc::now();
        ticket.mark_used(now);
        assert!(ticket.is_used);
        assert_eq!(ticket.validated_at, Some(now));
    }
}
