use serde::{Deserialize, Serialize};
use turnstile_shared::TierInput;

/// Batch-level figures derived from its tiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BatchAggregates {
    /// Sum of tier quantities
    pub quantity: u32,
    /// Quantity-weighted mean price: sum(price * qty) / sum(qty)
    pub price: f64,
    /// Sum of price * qty
    pub total_revenue: f64,
}

impl BatchAggregates {
    /// Compute aggregates for tiers in declaration order.
    ///
    /// An empty tier list (or one whose quantities sum to zero) would divide
    /// by zero and is rejected.
    pub fn from_tiers(tiers: &[TierInput]) -> Result<Self, PricingError> {
        let quantity: u64 = tiers.iter().map(|t| u64::from(t.quantity)).sum();
        if quantity == 0 {
            return Err(PricingError::EmptyTiers);
        }
        let quantity = u32::try_from(quantity).map_err(|_| PricingError::QuantityOverflow)?;

        let total_revenue = total_revenue(tiers);

        Ok(Self {
            quantity,
            price: total_revenue / f64::from(quantity),
            total_revenue,
        })
    }
}

pub fn total_revenue(tiers: &[TierInput]) -> f64 {
    tiers.iter().map(TierInput::revenue).sum()
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PricingError {
    #[error("At least one tier with a positive quantity is required")]
    EmptyTiers,

    #[error("Total ticket quantity does not fit in 32 bits")]
    QuantityOverflow,
}
