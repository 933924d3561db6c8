use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

pub const ORGANIZER_ROLE: &str = "ORGANIZER";

// ============================================================================
// JWT Claims
// ============================================================================

/// `sub` is the owner id every batch and ticket query is scoped to
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrganizerClaims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

// ============================================================================
// Organizer Authentication Middleware
// ============================================================================

pub async fn organizer_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Extract token from Authorization header
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Decode and validate JWT
    let token_data = decode::<OrganizerClaims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    // 3. Check role and owner
    if token_data.claims.role != ORGANIZER_ROLE {
        return Err(StatusCode::FORBIDDEN);
    }
    if token_data.claims.sub.trim().is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    // 4. Inject claims into request extensions
    req.extensions_mut().insert(token_data.claims);

    Ok(next.run(req).await)
}
