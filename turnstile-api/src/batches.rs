use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use turnstile_catalog::validate_batch;
use turnstile_core::CoreError;
use turnstile_shared::{BatchDetail, EventBatch, EventDetails, NewBatch, TierInput};
use turnstile_ticket::{DeleteError, DeletionReport, IncompleteBatch, IssuanceStatus};
use uuid::Uuid;

use crate::error::{store_error, AppError};
use crate::middleware::OrganizerClaims;
use crate::runs;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    #[serde(flatten)]
    pub details: EventDetails,
    pub tiers: Vec<TierInput>,
}

#[derive(Debug, Serialize)]
pub struct CreateBatchResponse {
    pub run_id: Uuid,
    pub total: u32,
    pub price: f64,
    pub total_revenue: f64,
    pub status: IssuanceStatus,
}

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub batch: EventBatch,
    pub issued_count: usize,
    pub used_count: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchDetailResponse {
    #[serde(flatten)]
    pub detail: BatchDetail,
    pub used_count: usize,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub document_url: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/batches", post(create_batch).get(list_batches))
        .route("/v1/batches/incomplete", get(list_incomplete))
        .route("/v1/batches/{id}", get(get_batch).delete(delete_batch))
        .route("/v1/batches/{id}/document", post(regenerate_document))
}

/// POST /v1/batches
/// Validates up front, then issues in the background. Poll the returned run.
pub async fn create_batch(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Json(req): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<CreateBatchResponse>), AppError> {
    let request = NewBatch {
        owner_id: claims.sub.clone(),
        details: req.details,
        tiers: req.tiers,
    };
    let aggregates =
        validate_batch(&request).map_err(|e| AppError::ValidationError(e.to_string()))?;

    let run = state.runs.create(&claims.sub).await;
    info!(
        "Run {} started for owner {}: {} tickets across {} tiers",
        run.id,
        claims.sub,
        aggregates.quantity,
        request.tiers.len()
    );
    tokio::spawn(runs::execute(state.clone(), run.clone(), request));

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateBatchResponse {
            run_id: run.id,
            total: aggregates.quantity,
            price: aggregates.price,
            total_revenue: aggregates.total_revenue,
            status: run.tracker.snapshot().status,
        }),
    ))
}

/// GET /v1/batches
pub async fn list_batches(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
) -> Result<Json<Vec<BatchSummary>>, AppError> {
    let batches = state.repo.list_batches(&claims.sub).await.map_err(store_error)?;
    let tickets = state.repo.list_tickets(&claims.sub).await.map_err(store_error)?;

    let mut counts: HashMap<Uuid, (usize, usize)> = HashMap::new();
    for ticket in &tickets {
        let entry = counts.entry(ticket.batch_id).or_default();
        entry.0 += 1;
        if ticket.is_used {
            entry.1 += 1;
        }
    }

    let summaries = batches
        .into_iter()
        .map(|batch| {
            let (issued_count, used_count) = counts.get(&batch.id).copied().unwrap_or_default();
            BatchSummary {
                batch,
                issued_count,
                used_count,
            }
        })
        .collect();
    Ok(Json(summaries))
}

/// GET /v1/batches/incomplete
/// Batches whose stored rows disagree with their aggregates
pub async fn list_incomplete(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
) -> Result<Json<Vec<IncompleteBatch>>, AppError> {
    let incomplete = state
        .issuance
        .gateway()
        .find_incomplete(&claims.sub)
        .await
        .map_err(store_error)?;
    Ok(Json(incomplete))
}

/// GET /v1/batches/{id}
pub async fn get_batch(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<BatchDetailResponse>, AppError> {
    let detail = state
        .repo
        .get_batch(&claims.sub, batch_id)
        .await
        .map_err(store_error)?
        .ok_or_else(|| AppError::NotFoundError(format!("Batch {} not found", batch_id)))?;

    Ok(Json(BatchDetailResponse {
        used_count: detail.used_count(),
        detail,
    }))
}

/// DELETE /v1/batches/{id}
/// Tickets, then tiers, then the batch
pub async fn delete_batch(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<DeletionReport>, AppError> {
    let report = state
        .issuance
        .gateway()
        .delete_batch(&claims.sub, batch_id)
        .await
        .map_err(|e| match e {
            DeleteError::NotFound(id) => AppError::NotFoundError(format!("Batch {} not found", id)),
            DeleteError::Lookup { source, .. } => store_error(source),
            stage @ DeleteError::Stage { .. } => AppError::InternalServerError(stage.to_string()),
        })?;
    Ok(Json(report))
}

/// POST /v1/batches/{id}/document
pub async fn regenerate_document(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, AppError> {
    let document_url = state
        .issuance
        .publish_document(&claims.sub, batch_id)
        .await
        .map_err(|e| match e {
            CoreError::Store(source) => store_error(source),
            other => AppError::InternalServerError(other.to_string()),
        })?;
    Ok(Json(DocumentResponse { document_url }))
}
