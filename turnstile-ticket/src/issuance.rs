use chrono::{DateTime, Utc};
use turnstile_shared::{EventBatch, NewTicket, PricingTier, TierInput};
use uuid::Uuid;

use crate::codec::{self, CodecError, QrPayload};
use crate::qr::{QrRenderer, RenderError};

/// Reference to a tier by declaration position, valid only until the tier
/// rows exist. Resolved to a real id through [`TierMapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTierRef(usize);

/// One unit to issue: which tier it belongs to and its batch-wide number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSlot {
    pub tier: PendingTierRef,
    pub number: u32,
}

/// Positional mapping from requested tiers to the rows the store created
#[derive(Debug, Clone)]
pub struct TierMapping {
    tiers: Vec<PricingTier>,
}

impl TierMapping {
    /// Pair requested tiers with inserted rows. The store must return one row
    /// per requested tier, in the same order.
    pub fn from_inserted(
        requested: &[TierInput],
        inserted: Vec<PricingTier>,
    ) -> Result<Self, IssuanceError> {
        if requested.len() != inserted.len() {
            return Err(IssuanceError::TierMismatch(format!(
                "requested {} tiers, store returned {}",
                requested.len(),
                inserted.len()
            )));
        }
        for (index, (want, got)) in requested.iter().zip(&inserted).enumerate() {
            if want.name != got.name || want.quantity != got.quantity {
                return Err(IssuanceError::TierMismatch(format!(
                    "tier {} came back as '{}' x{}, expected '{}' x{}",
                    index, got.name, got.quantity, want.name, want.quantity
                )));
            }
        }

        Ok(Self { tiers: inserted })
    }

    pub fn resolve(&self, tier: PendingTierRef) -> Option<Uuid> {
        self.tiers.get(tier.0).map(|t| t.id)
    }

    pub fn tier_ids(&self) -> Vec<Uuid> {
        self.tiers.iter().map(|t| t.id).collect()
    }

    pub fn tiers(&self) -> &[PricingTier] {
        &self.tiers
    }
}

/// A fully rendered ticket waiting for its tier id
#[derive(Debug, Clone)]
pub struct TicketDraft {
    pub id: Uuid,
    pub ticket_number: u32,
    pub ticket_code: String,
    pub tier: PendingTierRef,
    pub tier_name: String,
    pub price: f64,
    pub qr_payload: String,
    pub qr_image: String,
    pub seat_section: Option<String>,
    pub seat_row: Option<String>,
    pub seat_number: Option<String>,
}

impl TicketDraft {
    pub fn finalize(
        self,
        batch_id: Uuid,
        mapping: &TierMapping,
    ) -> Result<NewTicket, IssuanceError> {
        let tier_id = mapping
            .resolve(self.tier)
            .ok_or(IssuanceError::UnmappedTier {
                ticket_number: self.ticket_number,
            })?;

        Ok(NewTicket {
            id: self.id,
            batch_id,
            tier_id,
            ticket_number: self.ticket_number,
            ticket_code: self.ticket_code,
            qr_payload: self.qr_payload,
            qr_image: Some(self.qr_image),
            seat_section: self.seat_section,
            seat_row: self.seat_row,
            seat_number: self.seat_number,
        })
    }
}

/// Expands a batch and its tiers into numbered, QR-coded ticket drafts.
///
/// Numbering is global across the batch in tier declaration order: tier 0
/// gets 1..=q0, tier 1 gets q0+1..=q0+q1, and so on.
pub struct IssuanceEngine<'a> {
    batch: &'a EventBatch,
    tiers: &'a [TierInput],
    renderer: QrRenderer,
    issued_at: DateTime<Utc>,
}

impl<'a> IssuanceEngine<'a> {
    pub fn new(
        batch: &'a EventBatch,
        tiers: &'a [TierInput],
        renderer: QrRenderer,
    ) -> Result<Self, IssuanceError> {
        if tiers.iter().all(|t| t.quantity == 0) {
            return Err(IssuanceError::NoTiers);
        }
        Ok(Self {
            batch,
            tiers,
            renderer,
            issued_at: Utc::now(),
        })
    }

    /// Pin the generation timestamp embedded in every payload
    pub fn with_timestamp(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn total(&self) -> u32 {
        self.tiers.iter().map(|t| t.quantity).sum()
    }

    /// Every unit in issuance order
    pub fn units(&self) -> impl Iterator<Item = UnitSlot> + '_ {
        let mut offset = 0u32;
        self.tiers.iter().enumerate().flat_map(move |(index, tier)| {
            let start = offset;
            offset += tier.quantity;
            (1..=tier.quantity).map(move |n| UnitSlot {
                tier: PendingTierRef(index),
                number: start + n,
            })
        })
    }

    pub fn tier_name(&self, tier: PendingTierRef) -> &str {
        self.tiers.get(tier.0).map(|t| t.name.as_str()).unwrap_or_default()
    }

    pub fn ticket_code(&self, number: u32) -> String {
        format!("TKT-{}-{:06}", self.batch.code_prefix(), number)
    }

    /// Build, encode and render one unit
    pub fn draft(&self, slot: UnitSlot) -> Result<TicketDraft, IssuanceError> {
        let tier = self
            .tiers
            .get(slot.tier.0)
            .ok_or(IssuanceError::UnmappedTier {
                ticket_number: slot.number,
            })?;
        let ticket_code = self.ticket_code(slot.number);

        let payload = QrPayload {
            ticket_id: ticket_code.clone(),
            batch_id: self.batch.id.to_string(),
            event_title: self.batch.title.clone(),
            home_team: self.batch.home_team.clone(),
            away_team: self.batch.away_team.clone(),
            stadium_name: self.batch.venue_name.clone(),
            event_date: Some(self.batch.event_date.clone()),
            event_start_time: Some(self.batch.start_time.clone()),
            tier_name: Some(tier.name.clone()),
            price: tier.price,
            ticket_number: Some(slot.number),
            tier_index: Some(slot.tier.0),
            timestamp: self.issued_at.timestamp_millis(),
            checksum: String::new(),
        };
        let qr_payload = codec::encode(payload)?;
        let qr_image = self
            .renderer
            .render_data_uri(&qr_payload)
            .map_err(|source| IssuanceError::Render {
                ticket_number: slot.number,
                source,
            })?;

        Ok(TicketDraft {
            id: Uuid::new_v4(),
            ticket_number: slot.number,
            ticket_code,
            tier: slot.tier,
            tier_name: tier.name.clone(),
            price: tier.price,
            qr_payload,
            qr_image,
            // Unseated: the ticket number doubles as the seat
            seat_section: None,
            seat_row: None,
            seat_number: Some(slot.number.to_string()),
        })
    }

    /// Issue every unit, stopping at the first failure
    pub fn issue(&self) -> Result<Vec<TicketDraft>, IssuanceError> {
        self.units().map(|slot| self.draft(slot)).collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("No tiers to issue")]
    NoTiers,

    #[error("QR rendering failed for ticket {ticket_number}: {source}")]
    Render {
        ticket_number: u32,
        #[source]
        source: RenderError,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Ticket {ticket_number} references a tier with no stored id")]
    UnmappedTier {
        ticket_number: u32,
    },

    #[error("Stored tiers do not match the request: {0}")]
    TierMismatch(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, verify, ScanCode};

    fn batch(title: &str) -> EventBatch {
        EventBatch {
            id: Uuid::parse_str("c0ffee00-1234-4abc-8def-000000000001").unwrap(),
            owner_id: "organizer-1".to_string(),
            title: title.to_string(),
            description: None,
            event_date: "2026-11-21".to_string(),
            start_time: "19:30".to_string(),
            end_time: "21:30".to_string(),
            home_team: Some("Harbour FC".to_string()),
            away_team: Some("Hill United".to_string()),
            venue_name: Some("Quayside".to_string()),
            competition: None,
            price: 70.0,
            quantity: 5,
            document_url: None,
            created_at: Utc::now(),
        }
    }

    fn vip_and_standard() -> Vec<TierInput> {
        vec![
            TierInput::new("VIP", 100.0, 2),
            TierInput::new("Standard", 50.0, 3),
        ]
    }

    #[test]
    fn test_global_numbering_across_tiers() {
        let batch = batch("Harbour Derby");
        let tiers = vip_and_standard();
        let engine = IssuanceEngine::new(&batch, &tiers, QrRenderer::new(64, 1)).unwrap();

        let drafts = engine.issue().unwrap();

        assert_eq!(drafts.len(), 5);
        let numbers: Vec<u32> = drafts.iter().map(|d| d.ticket_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        let tiers: Vec<&str> = drafts.iter().map(|d| d.tier_name.as_str()).collect();
        assert_eq!(tiers, vec!["VIP", "VIP", "Standard", "Standard", "Standard"]);
        assert_eq!(drafts[0].price, 100.0);
        assert_eq!(drafts[4].price, 50.0);
    }

    #[test]
    fn test_draft_payload_and_defaults() {
        let batch = batch("Harbour Derby");
        let tiers = vip_and_standard();
        let at = Utc::now();
        let engine = IssuanceEngine::new(&batch, &tiers, QrRenderer::new(64, 1))
            .unwrap()
            .with_timestamp(at);

        let drafts = engine.issue().unwrap();
        let third = &drafts[2];

        assert_eq!(third.ticket_code, "TKT-C0FFEE00-000003");
        assert_eq!(third.seat_number.as_deref(), Some("3"));
        assert!(third.seat_section.is_none());
        assert!(third.qr_image.starts_with("data:image/png;base64,"));

        let ScanCode::Structured(payload) = decode(&third.qr_payload).unwrap() else {
            panic!("expected structured payload");
        };
        assert!(verify(&payload));
        assert_eq!(payload.ticket_id, third.ticket_code);
        assert_eq!(payload.tier_index, Some(1));
        assert_eq!(payload.ticket_number, Some(3));
        assert_eq!(payload.timestamp, at.timestamp_millis());
        assert_eq!(payload.stadium_name.as_deref(), Some("Quayside"));

        let ids: std::collections::HashSet<Uuid> = drafts.iter().map(|d| d.id).collect();
        assert_eq!(ids.len(), drafts.len());
    }

    #[test]
    fn test_finalize_resolves_tier_ids() {
        let batch = batch("Harbour Derby");
        let tiers = vip_and_standard();
        let inserted: Vec<PricingTier> = tiers
            .iter()
            .map(|t| PricingTier {
                id: Uuid::new_v4(),
                batch_id: batch.id,
                name: t.name.clone(),
                price: t.price,
                quantity: t.quantity,
                description: None,
                created_at: Utc::now(),
            })
            .collect();
        let mapping = TierMapping::from_inserted(&tiers, inserted.clone()).unwrap();
        let engine = IssuanceEngine::new(&batch, &tiers, QrRenderer::new(64, 1)).unwrap();

        let rows: Vec<NewTicket> = engine
            .issue()
            .unwrap()
            .into_iter()
            .map(|d| d.finalize(batch.id, &mapping).unwrap())
            .collect();

        assert_eq!(rows[1].tier_id, inserted[0].id);
        assert_eq!(rows[2].tier_id, inserted[1].id);
        assert!(rows.iter().all(|r| r.batch_id == batch.id));
    }

    #[test]
    fn test_mapping_rejects_reordered_tiers() {
        let batch = batch("Harbour Derby");
        let tiers = vip_and_standard();
        let inserted: Vec<PricingTier> = tiers
            .iter()
            .rev()
            .map(|t| PricingTier {
                id: Uuid::new_v4(),
                batch_id: batch.id,
                name: t.name.clone(),
                price: t.price,
                quantity: t.quantity,
                description: None,
                created_at: Utc::now(),
            })
            .collect();

        assert!(matches!(
            TierMapping::from_inserted(&tiers, inserted.clone()),
            Err(IssuanceError::TierMismatch(_))
        ));
        assert!(matches!(
            TierMapping::from_inserted(&tiers, inserted[..1].to_vec()),
            Err(IssuanceError::TierMismatch(_))
        ));
    }

    #[test]
    fn test_render_failure_aborts_issuance() {
        let huge_title = "T".repeat(3_000);
        let batch = batch(&huge_title);
        let tiers = vip_and_standard();
        let engine = IssuanceEngine::new(&batch, &tiers, QrRenderer::default()).unwrap();

        match engine.issue() {
            Err(IssuanceError::Render { ticket_number, .. }) => assert_eq!(ticket_number, 1),
            other => panic!("expected render failure, got {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_empty_tiers_rejected() {
        let batch = batch("Harbour Derby");
        assert!(matches!(
            IssuanceEngine::new(&batch, &[], QrRenderer::default()),
            Err(IssuanceError::NoTiers)
        ));
    }
}
