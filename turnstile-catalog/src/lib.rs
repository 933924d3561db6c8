pub mod pricing;
pub mod validation;

pub use pricing::{BatchAggregates, PricingError};
pub use validation::{validate_batch, ValidationError};
