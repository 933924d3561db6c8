pub mod models;

pub use models::batch::{BatchDetail, EventBatch, EventDetails, NewBatch, PricingTier, TierInput};
pub use models::ticket::{IndividualTicket, NewTicket};
