use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    routing::post,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use turnstile_core::{StoreError, TicketRepository};
use turnstile_ticket::{ScanOutcome, ValidationResolver};

use crate::error::{store_error, AppError};
use crate::middleware::OrganizerClaims;
use crate::state::AppState;

/// Scanner sessions older than this are reloaded, and dropped when another
/// owner's session is created
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

struct Session {
    resolver: Arc<ValidationResolver>,
    loaded_at: Instant,
}

/// One resolver per owner, loaded on first scan and kept warm for a while
#[derive(Clone)]
pub struct ScanSessions {
    repo: Arc<dyn TicketRepository>,
    ttl: Duration,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl ScanSessions {
    pub fn new(repo: Arc<dyn TicketRepository>) -> Self {
        Self::with_ttl(repo, DEFAULT_SESSION_TTL)
    }

    pub fn with_ttl(repo: Arc<dyn TicketRepository>, ttl: Duration) -> Self {
        Self {
            repo,
            ttl,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn resolver(&self, owner_id: &str) -> Result<Arc<ValidationResolver>, StoreError> {
        if let Some(existing) = self.sessions.read().await.get(owner_id) {
            if existing.loaded_at.elapsed() < self.ttl {
                return Ok(existing.resolver.clone());
            }
        }

        let loaded = Arc::new(ValidationResolver::load(self.repo.clone(), owner_id).await?);
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| s.loaded_at.elapsed() < self.ttl);
        // Another request may have loaded it meanwhile
        let session = sessions.entry(owner_id.to_string()).or_insert(Session {
            resolver: loaded,
            loaded_at: Instant::now(),
        });
        Ok(session.resolver.clone())
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub known_tickets: usize,
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/scan", post(scan_ticket))
        .route("/v1/scan/refresh", post(refresh_tickets))
}

/// POST /v1/scan
/// Rejections come back as 200 with an outcome, not as errors
pub async fn scan_ticket(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanOutcome>, AppError> {
    if req.code.trim().is_empty() {
        return Err(AppError::ValidationError("code must not be empty".to_string()));
    }

    let resolver = state.scanners.resolver(&claims.sub).await.map_err(store_error)?;
    let outcome = resolver.validate(&req.code).await.map_err(store_error)?;

    state.metrics.scans.with_label_values(&[outcome.kind()]).inc();
    if let ScanOutcome::Accepted { ticket } = &outcome {
        state.issuance.announce_validation(ticket).await;
    }
    Ok(Json(outcome))
}

/// POST /v1/scan/refresh
pub async fn refresh_tickets(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
) -> Result<Json<RefreshResponse>, AppError> {
    let resolver = state.scanners.resolver(&claims.sub).await.map_err(store_error)?;
    let known_tickets = resolver.refresh().await.map_err(store_error)?;
    Ok(Json(RefreshResponse { known_tickets }))
}
