//! QR payload encoding.
//!
//! The payload is a JSON object carrying enough ticket data to be read by a
//! human-facing scanner plus a short checksum. The checksum only catches
//! corruption and typos in manual entry; it is not a signature.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CHECKSUM_SEPARATOR: &str = "|";

/// Fields embedded in every ticket QR code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QrPayload {
    #[serde(alias = "id")]
    pub ticket_id: String,
    #[serde(default)]
    pub batch_id: String,
    pub event_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub away_team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stadium_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_name: Option<String>,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_index: Option<usize>,
    /// Generation time, milliseconds since the Unix epoch
    pub timestamp: i64,
    pub checksum: String,
}

impl QrPayload {
    /// Recompute the checksum from the current field values
    pub fn seal(&mut self) {
        self.checksum = checksum(
            &self.ticket_id,
            &self.batch_id,
            &self.event_title,
            self.price,
            self.timestamp,
        );
    }
}

/// Result of decoding a scanned string
#[derive(Debug, Clone, PartialEq)]
pub enum ScanCode {
    Structured(QrPayload),
    /// A bare UUID from the minimal legacy encoding
    Literal(Uuid),
}

impl ScanCode {
    /// The identifier to look the ticket up by
    pub fn ticket_ref(&self) -> String {
        match self {
            ScanCode::Structured(payload) => payload.ticket_id.clone(),
            ScanCode::Literal(id) => id.to_string(),
        }
    }
}

/// Order-sensitive 32-bit rolling hash over the checksum basis, as 8 hex digits.
///
/// Basis: ticket id, batch id, event title, price, timestamp.
pub fn checksum(
    ticket_id: &str,
    batch_id: &str,
    event_title: &str,
    price: f64,
    timestamp: i64,
) -> String {
    let basis = [
        ticket_id.to_string(),
        batch_id.to_string(),
        event_title.to_string(),
        price.to_string(),
        timestamp.to_string(),
    ]
    .join(CHECKSUM_SEPARATOR);

    let hash = basis
        .bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
    format!("{:08x}", hash)
}

/// Serialize a payload, sealing it with a fresh checksum
pub fn encode(mut payload: QrPayload) -> Result<String, CodecError> {
    payload.seal();
    serde_json::to_string(&payload).map_err(|e| CodecError::Serialize(e.to_string()))
}

/// Parse a scanned string. Anything that is not a structured payload is
/// accepted only if it looks like a bare UUID.
pub fn decode(raw: &str) -> Result<ScanCode, CodecError> {
    let trimmed = raw.trim();
    match serde_json::from_str::<QrPayload>(trimmed) {
        Ok(payload) => Ok(ScanCode::Structured(payload)),
        Err(_) => Uuid::parse_str(trimmed)
            .map(ScanCode::Literal)
            .map_err(|_| CodecError::Malformed(truncate(trimmed))),
    }
}

/// Does the embedded checksum match the fields? Never fails.
pub fn verify(payload: &QrPayload) -> bool {
    let expected = checksum(
        &payload.ticket_id,
        &payload.batch_id,
        &payload.event_title,
        payload.price,
        payload.timestamp,
    );
    expected.eq_ignore_ascii_case(&payload.checksum)
}

/// Decode and verify in one step; malformed input simply does not verify
pub fn verify_str(raw: &str) -> bool {
    match decode(raw) {
        Ok(ScanCode::Structured(payload)) => verify(&payload),
        _ => false,
    }
}

fn truncate(raw: &str) -> String {
    raw.chars().take(64).collect()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Payload is neither a ticket payload nor a ticket id: {0}")]
    Malformed(String),

    #[error("Payload serialization failed: {0}")]
    Serialize(String),
}
