use turnstile_shared::{EventDetails, NewBatch, TierInput};

use crate::pricing::BatchAggregates;

pub const MAX_TIER_PRICE: f64 = 1_000_000.0;
pub const MAX_TIER_QUANTITY: u32 = 10_000;
pub const MAX_BATCH_QUANTITY: u32 = 50_000;
pub const MAX_TIER_NAME_LEN: usize = 100;

/// Check a batch request before anything is written.
///
/// Returns the derived aggregates so callers never compute them from
/// unchecked input.
pub fn validate_batch(request: &NewBatch) -> Result<BatchAggregates, ValidationError> {
    if request.owner_id.trim().is_empty() {
        return Err(ValidationError::MissingField("owner_id"));
    }
    validate_details(&request.details)?;

    if request.tiers.is_empty() {
        return Err(ValidationError::NoTiers);
    }
    for (index, tier) in request.tiers.iter().enumerate() {
        validate_tier(index, tier)?;
    }

    let aggregates = BatchAggregates::from_tiers(&request.tiers)
        .map_err(|_| ValidationError::NoTiers)?;
    if aggregates.quantity > MAX_BATCH_QUANTITY {
        return Err(ValidationError::BatchTooLarge {
            requested: aggregates.quantity,
            max: MAX_BATCH_QUANTITY,
        });
    }

    Ok(aggregates)
}

fn validate_details(details: &EventDetails) -> Result<(), ValidationError> {
    let required = [
        ("title", &details.title),
        ("event_date", &details.event_date),
        ("start_time", &details.start_time),
        ("end_time", &details.end_time),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
    }
    Ok(())
}

fn validate_tier(index: usize, tier: &TierInput) -> Result<(), ValidationError> {
    let name = tier.name.trim();
    if name.is_empty() {
        return Err(ValidationError::InvalidTier {
            index,
            reason: "name is required".to_string(),
        });
    }
    if name.chars().count() > MAX_TIER_NAME_LEN {
        return Err(ValidationError::InvalidTier {
            index,
            reason: format!("name exceeds {} characters", MAX_TIER_NAME_LEN),
        });
    }
    if !tier.price.is_finite() || tier.price < 0.0 || tier.price > MAX_TIER_PRICE {
        return Err(ValidationError::InvalidTier {
            index,
            reason: format!("price must be between 0 and {}", MAX_TIER_PRICE),
        });
    }
    if tier.quantity == 0 || tier.quantity > MAX_TIER_QUANTITY {
        return Err(ValidationError::InvalidTier {
            index,
            reason: format!("quantity must be between 1 and {}", MAX_TIER_QUANTITY),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("At least one pricing tier is required")]
    NoTiers,

    #[error("Tier {index} is invalid: {reason}")]
    InvalidTier {
        index: usize,
        reason: String,
    },

    #[error("Batch too large: requested {requested} tickets, max {max}")]
    BatchTooLarge {
        requested: u32,
        max: u32,
    },
}
