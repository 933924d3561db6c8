pub mod auth;

pub use auth::{organizer_auth_middleware, OrganizerClaims};
