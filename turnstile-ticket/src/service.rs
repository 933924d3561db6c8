use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use turnstile_catalog::{validate_batch, BatchAggregates, ValidationError};
use turnstile_core::{
    CoreError, CoreResult, DocumentRenderer, DocumentStore, IssuanceNotifier, StoreError,
};
use turnstile_shared::models::events::{IssuanceWebhook, TicketValidatedEvent, WebhookTicket};
use turnstile_shared::{EventBatch, IndividualTicket, NewBatch, PricingTier};
use uuid::Uuid;

use crate::gateway::{CreatedRecords, IssuanceSaga, PersistError, PersistenceGateway};
use crate::issuance::{IssuanceEngine, IssuanceError};
use crate::progress::{IssuanceStatus, ProgressError, ProgressTracker};
use crate::qr::QrRenderer;

/// Renders a printable sheet for a batch and stores it
#[derive(Clone)]
pub struct DocumentPipeline {
    pub renderer: Arc<dyn DocumentRenderer>,
    pub store: Arc<dyn DocumentStore>,
}

/// Outcome of a run that did not fail
#[derive(Debug, Clone, Serialize)]
pub struct IssuanceReport {
    pub batch: EventBatch,
    pub tiers: Vec<PricingTier>,
    pub status: IssuanceStatus,
    pub tickets_committed: usize,
    pub total_revenue: f64,
    pub document_url: Option<String>,
    /// Post-commit steps that failed without failing the run
    pub warnings: Vec<String>,
}

/// Runs issuance end to end: validate, persist batch, tiers and tickets,
/// then generate the document and notify.
#[derive(Clone)]
pub struct IssuanceService {
    gateway: PersistenceGateway,
    renderer: QrRenderer,
    unit_delay: Duration,
    documents: Option<DocumentPipeline>,
    notifiers: Vec<Arc<dyn IssuanceNotifier>>,
}

impl IssuanceService {
    pub fn new(gateway: PersistenceGateway, renderer: QrRenderer) -> Self {
        Self {
            gateway,
            renderer,
            unit_delay: Duration::ZERO,
            documents: None,
            notifiers: Vec::new(),
        }
    }

    /// Pause between units so progress stays observable on small batches
    pub fn with_unit_delay(mut self, delay: Duration) -> Self {
        self.unit_delay = delay;
        self
    }

    pub fn with_documents(mut self, pipeline: DocumentPipeline) -> Self {
        self.documents = Some(pipeline);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn IssuanceNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub async fn issue_batch(
        &self,
        request: &NewBatch,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<IssuanceReport, RunError> {
        let aggregates = validate_batch(request)?;
        tracker.start(aggregates.quantity)?;

        let mut saga = self.gateway.begin();
        let outcome = self
            .persist(request, &aggregates, &mut saga, tracker, cancel)
            .await;

        let committed = match outcome {
            Ok(committed) => committed,
            Err(source) => {
                let dropped = saga.discard_pending();
                if dropped > 0 {
                    debug!("Discarded {} unsent ticket rows", dropped);
                }
                let created = saga.into_created();
                warn!("Issuance failed: {} (created: {:?})", source, created);
                if let Err(e) = tracker.fail(source.to_string()) {
                    debug!("Tracker not updated: {}", e);
                }
                return Err(RunError::Stage { source, created });
            }
        };
        let tickets_committed = saga.created().tickets_committed;

        let Committed {
            mut batch,
            tiers,
            tickets,
            cancelled,
        } = committed;

        if cancelled {
            if let Err(e) = tracker.cancel() {
                debug!("Tracker not updated: {}", e);
            }
            info!(
                "Issuance of batch {} cancelled after {} of {} tickets",
                batch.id, tickets_committed, batch.quantity
            );
            return Ok(IssuanceReport {
                batch,
                tiers,
                status: IssuanceStatus::Cancelled,
                tickets_committed,
                total_revenue: aggregates.total_revenue,
                document_url: None,
                warnings: Vec::new(),
            });
        }

        // Post-commit steps run against a terminal tracker that may be reset meanwhile
        let status = tracker.snapshot().status;

        let mut warnings = Vec::new();
        if self.documents.is_some() {
            match self.publish_document(&batch.owner_id, batch.id).await {
                Ok(url) => batch.document_url = Some(url),
                Err(e) => {
                    warn!("Document for batch {} not generated: {}", batch.id, e);
                    warnings.push(e.to_string());
                }
            }
        }

        let webhook = IssuanceWebhook {
            batch: batch.clone(),
            tiers: tiers.clone(),
            tickets,
            total_revenue: aggregates.total_revenue,
        };
        for notifier in &self.notifiers {
            if let Err(e) = notifier.batch_issued(&webhook).await {
                warn!("{} notification for batch {} failed: {}", notifier.name(), batch.id, e);
                warnings.push(format!("{}: {}", notifier.name(), e));
            }
        }

        info!(
            "Issued batch {}: {} tickets, revenue {:.2}",
            batch.id, tickets_committed, aggregates.total_revenue
        );
        Ok(IssuanceReport {
            document_url: batch.document_url.clone(),
            batch,
            tiers,
            status,
            tickets_committed,
            total_revenue: aggregates.total_revenue,
            warnings,
        })
    }

    async fn persist(
        &self,
        request: &NewBatch,
        aggregates: &BatchAggregates,
        saga: &mut IssuanceSaga<'_>,
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<Committed, StageError> {
        let batch = saga.create_batch(request, aggregates).await?;
        let mapping = saga.create_tiers(batch.id, &request.tiers).await?;

        let engine = IssuanceEngine::new(&batch, &request.tiers, self.renderer)?
            .with_timestamp(Utc::now());
        let mut tickets = Vec::with_capacity(engine.total() as usize);
        let mut cancelled = false;

        for slot in engine.units() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            tracker.set_tier(engine.tier_name(slot.tier));

            let draft = engine.draft(slot)?;
            tickets.push(WebhookTicket {
                id: draft.id,
                ticket_number: draft.ticket_number,
                ticket_code: draft.ticket_code.clone(),
                tier_name: draft.tier_name.clone(),
                price: draft.price,
                qr_code: draft.qr_payload.clone(),
                seat_section: draft.seat_section.clone(),
                seat_row: draft.seat_row.clone(),
                seat_number: draft.seat_number.clone(),
            });

            let row = draft.finalize(batch.id, &mapping)?;
            let accepted = saga.push(row).await?;
            record_accepted(tracker, accepted);

            if !self.unit_delay.is_zero() {
                tokio::time::sleep(self.unit_delay).await;
            }
        }

        let accepted = saga.flush().await?;
        record_accepted(tracker, accepted);
        saga.verify()?;

        Ok(Committed {
            batch,
            tiers: mapping.tiers().to_vec(),
            tickets,
            cancelled,
        })
    }

    /// Render and store the printable sheet, then record its URL on the batch
    pub async fn publish_document(&self, owner_id: &str, batch_id: Uuid) -> CoreResult<String> {
        let Some(pipeline) = &self.documents else {
            return Err(CoreError::Document("no document pipeline configured".to_string()));
        };
        let detail = self
            .gateway
            .load(owner_id, batch_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", batch_id)))?;

        let document = pipeline.renderer.render(&detail)?;
        let url = pipeline.store.upload(owner_id, batch_id, &document).await?;
        self.gateway.attach_document(batch_id, &url).await?;

        info!("Document for batch {} stored at {}", batch_id, url);
        Ok(url)
    }

    /// Fan a validation out to every notifier, best effort
    pub async fn announce_validation(&self, ticket: &IndividualTicket) {
        let event = TicketValidatedEvent {
            ticket_id: ticket.id,
            batch_id: ticket.batch_id,
            ticket_number: ticket.ticket_number,
            validated_at: ticket
                .validated_at
                .unwrap_or_else(Utc::now)
                .timestamp(),
        };
        for notifier in &self.notifiers {
            if let Err(e) = notifier.ticket_validated(&event).await {
                warn!("{} validation event for {} failed: {}", notifier.name(), ticket.id, e);
            }
        }
    }
}

struct Committed {
    batch: EventBatch,
    tiers: Vec<PricingTier>,
    tickets: Vec<WebhookTicket>,
    cancelled: bool,
}

fn record_accepted(tracker: &ProgressTracker, accepted: usize) {
    for _ in 0..accepted {
        if let Err(e) = tracker.advance() {
            debug!("Progress not advanced: {}", e);
            break;
        }
    }
}

/// Failure inside the persistence or generation stages
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Issuance(#[from] IssuanceError),
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Invalid batch: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// Records in `created` were committed before the failure and were not
    /// rolled back
    #[error("{source}")]
    Stage {
        source: StageError,
        created: CreatedRecords,
    },
}

impl RunError {
    pub fn created(&self) -> Option<&CreatedRecords> {
        match self {
            RunError::Stage { created, .. } => Some(created),
            _ => None,
        }
    }
}
