use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use turnstile_shared::NewBatch;
use turnstile_ticket::{
    CreatedRecords, DeletionReport, IssuanceReport, IssuanceStatus, Progress, ProgressTracker,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::OrganizerClaims;
use crate::state::AppState;

// ============================================================================
// Run Registry
// ============================================================================

/// One issuance run: its progress, its cancel switch, and how it ended
pub struct Run {
    pub id: Uuid,
    pub owner_id: String,
    pub started_at: DateTime<Utc>,
    pub tracker: ProgressTracker,
    pub cancel: CancellationToken,
    outcome: RwLock<Option<RunOutcome>>,
    finished: OnceLock<Instant>,
}

impl Run {
    pub async fn outcome(&self) -> Option<RunOutcome> {
        self.outcome.read().await.clone()
    }

    async fn finish(&self, outcome: RunOutcome) {
        *self.outcome.write().await = Some(outcome);
        let _ = self.finished.set(Instant::now());
    }

    /// Back to idle once the run has recorded its outcome. A terminal
    /// tracker alone is not enough: documents and notifications still run
    /// after the last ticket commits.
    pub async fn reset(&self) -> Result<(), AppError> {
        let mut outcome = self.outcome.write().await;
        if outcome.is_none() {
            let status = self.tracker.snapshot().status;
            return Err(AppError::ConflictError(format!(
                "Run is {:?} and still finishing",
                status
            )));
        }
        self.tracker
            .reset()
            .map_err(|e| AppError::ConflictError(e.to_string()))?;
        *outcome = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    Issued(IssuanceReport),
    Failed {
        error: String,
        /// Rows committed before the failure; not rolled back
        created: Option<CreatedRecords>,
    },
}

/// Finished runs stay readable this long before they are dropped
pub const DEFAULT_RUN_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<Uuid, Arc<Run>>>>,
    retention: Duration,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RUN_RETENTION)
    }
}

impl RunRegistry {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Registers a new run, dropping finished runs past retention
    pub async fn create(&self, owner_id: &str) -> Arc<Run> {
        let run = Arc::new(Run {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            started_at: Utc::now(),
            tracker: ProgressTracker::new(),
            cancel: CancellationToken::new(),
            outcome: RwLock::new(None),
            finished: OnceLock::new(),
        });
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, r| r.finished.get().map_or(true, |at| at.elapsed() < self.retention));
        if runs.len() < before {
            debug!("Dropped {} expired runs", before - runs.len());
        }
        runs.insert(run.id, run.clone());
        run
    }

    /// Runs are only visible to the owner that started them
    pub async fn get(&self, owner_id: &str, run_id: Uuid) -> Option<Arc<Run>> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .filter(|r| r.owner_id == owner_id)
            .cloned()
    }
}

/// Drive one run to completion and record how it ended
pub async fn execute(state: AppState, run: Arc<Run>, request: NewBatch) {
    let result = state.issuance.issue_batch(&request, &run.tracker, &run.cancel).await;

    let outcome = match result {
        Ok(report) => {
            state.metrics.tickets_issued.inc_by(report.tickets_committed as u64);
            RunOutcome::Issued(report)
        }
        Err(err) => {
            warn!("Run {} failed: {}", run.id, err);
            let created = err.created().cloned();
            if let Some(created) = &created {
                state.metrics.tickets_issued.inc_by(created.tickets_committed as u64);
            }
            RunOutcome::Failed {
                error: err.to_string(),
                created,
            }
        }
    };

    // The tracker may already have been reset by now; the outcome is final
    let label = match &outcome {
        RunOutcome::Issued(report) => status_label(report.status),
        RunOutcome::Failed { .. } => status_label(IssuanceStatus::Error),
    };
    state.metrics.runs_finished.with_label_values(&[label]).inc();
    info!("Run {} finished as {}", run.id, label);
    run.finish(outcome).await;
}

fn status_label(status: IssuanceStatus) -> &'static str {
    match status {
        IssuanceStatus::Idle => "idle",
        IssuanceStatus::Creating => "creating",
        IssuanceStatus::Cancelled => "cancelled",
        IssuanceStatus::Completed => "completed",
        IssuanceStatus::Error => "error",
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RunView {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub progress: Progress,
    pub outcome: Option<RunOutcome>,
}

impl RunView {
    async fn of(run: &Run) -> Self {
        Self {
            run_id: run.id,
            started_at: run.started_at,
            progress: run.tracker.snapshot(),
            outcome: run.outcome().await,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/runs/{id}", get(get_run))
        .route("/v1/runs/{id}/cancel", post(cancel_run))
        .route("/v1/runs/{id}/reset", post(reset_run))
        .route("/v1/runs/{id}/compensate", post(compensate_run))
        .route("/v1/runs/{id}/events", get(run_events))
}

async fn find_run(
    state: &AppState,
    claims: &OrganizerClaims,
    run_id: Uuid,
) -> Result<Arc<Run>, AppError> {
    state
        .runs
        .get(&claims.sub, run_id)
        .await
        .ok_or_else(|| AppError::NotFoundError(format!("Run {} not found", run_id)))
}

/// GET /v1/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunView>, AppError> {
    let run = find_run(&state, &claims, run_id).await?;
    Ok(Json(RunView::of(&run).await))
}

/// POST /v1/runs/{id}/cancel
/// Takes effect before the next unit; tickets already committed stay.
pub async fn cancel_run(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Path(run_id): Path<Uuid>,
) -> Result<(StatusCode, Json<RunView>), AppError> {
    let run = find_run(&state, &claims, run_id).await?;
    let status = run.tracker.snapshot().status;
    if status != IssuanceStatus::Creating {
        return Err(AppError::ConflictError(format!("Run is {:?}, nothing to cancel", status)));
    }
    run.cancel.cancel();
    info!("Cancellation requested for run {}", run_id);
    Ok((StatusCode::ACCEPTED, Json(RunView::of(&run).await)))
}

/// POST /v1/runs/{id}/reset
pub async fn reset_run(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<RunView>, AppError> {
    let run = find_run(&state, &claims, run_id).await?;
    run.reset().await?;
    Ok(Json(RunView::of(&run).await))
}

/// POST /v1/runs/{id}/compensate
/// Delete whatever a failed run left behind
pub async fn compensate_run(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<DeletionReport>, AppError> {
    let run = find_run(&state, &claims, run_id).await?;
    let created = match run.outcome().await {
        Some(RunOutcome::Failed {
            created: Some(created),
            ..
        }) => created,
        _ => {
            return Err(AppError::ConflictError(
                "Only failed runs with committed records can be compensated".to_string(),
            ))
        }
    };

    let report = state
        .issuance
        .gateway()
        .compensate(&created)
        .await
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;
    Ok(Json(report))
}

/// GET /v1/runs/{id}/events
/// Server-sent progress snapshots; the stream ends after a terminal state
pub async fn run_events(
    State(state): State<AppState>,
    Extension(claims): Extension<OrganizerClaims>,
    Path(run_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let run = find_run(&state, &claims, run_id).await?;
    let updates = WatchStream::new(run.tracker.subscribe());
    Ok(Sse::new(progress_events(updates)).keep_alive(KeepAlive::default()))
}

fn progress_events(
    updates: impl Stream<Item = Progress>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    updates
        .scan(false, |finished, progress| {
            if *finished {
                return std::future::ready(None);
            }
            *finished = progress.status.is_terminal();
            std::future::ready(Some(progress))
        })
        .map(|progress| {
            let event = Event::default()
                .event("progress")
                .json_data(&progress)
                .unwrap_or_else(|_| Event::default().event("progress"));
            Ok(event)
        })
}
