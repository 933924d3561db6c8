use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use turnstile_catalog::BatchAggregates;
use turnstile_core::{StoreError, TicketRepository};
use turnstile_shared::{BatchDetail, EventBatch, NewBatch, NewTicket, TierInput};
use uuid::Uuid;

use crate::issuance::{IssuanceError, TierMapping};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// What an issuance run has written so far. Nothing is rolled back
/// automatically; pass this to [`PersistenceGateway::compensate`] to clean up.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CreatedRecords {
    pub batch_id: Option<Uuid>,
    pub tier_ids: Vec<Uuid>,
    pub tickets_committed: usize,
    pub chunks_committed: usize,
}

/// Counts removed by a deletion
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct DeletionReport {
    pub tickets_deleted: u64,
    pub tiers_deleted: u64,
    pub batch_deleted: bool,
}

/// A batch whose stored rows disagree with its aggregates
#[derive(Debug, Clone, Serialize)]
pub struct IncompleteBatch {
    pub batch: EventBatch,
    pub expected_tickets: u32,
    pub persisted_tickets: u64,
    pub persisted_tiers: u64,
}

/// Writes batches, tiers and tickets as ordered, dependent requests
#[derive(Clone)]
pub struct PersistenceGateway {
    repo: Arc<dyn TicketRepository>,
    chunk_size: usize,
}

impl PersistenceGateway {
    pub fn new(repo: Arc<dyn TicketRepository>, chunk_size: usize) -> Self {
        Self {
            repo,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Start recording a new three-stage write
    pub fn begin(&self) -> IssuanceSaga<'_> {
        IssuanceSaga {
            gateway: self,
            created: CreatedRecords::default(),
            pending: Vec::with_capacity(self.chunk_size),
            dispatched: 0,
        }
    }

    pub async fn load(
        &self,
        owner_id: &str,
        batch_id: Uuid,
    ) -> Result<Option<BatchDetail>, StoreError> {
        self.repo.get_batch(owner_id, batch_id).await
    }

    pub async fn attach_document(&self, batch_id: Uuid, url: &str) -> Result<(), StoreError> {
        self.repo.set_document_url(batch_id, url).await
    }

    /// Delete tickets, then tiers, then the batch. Stops at the first failing stage.
    pub async fn delete_batch(
        &self,
        owner_id: &str,
        batch_id: Uuid,
    ) -> Result<DeletionReport, DeleteError> {
        let owned = self
            .repo
            .get_batch(owner_id, batch_id)
            .await
            .map_err(|source| DeleteError::Lookup { batch_id, source })?;
        if owned.is_none() {
            return Err(DeleteError::NotFound(batch_id));
        }

        let report = self.delete_rows(batch_id).await?;
        info!(
            "Deleted batch {} ({} tickets, {} tiers)",
            batch_id, report.tickets_deleted, report.tiers_deleted
        );
        Ok(report)
    }

    /// Deliberate cleanup of whatever a failed or cancelled run left behind
    pub async fn compensate(
        &self,
        created: &CreatedRecords,
    ) -> Result<DeletionReport, DeleteError> {
        let Some(batch_id) = created.batch_id else {
            return Ok(DeletionReport::default());
        };
        warn!(
            "Compensating batch {}: {} tiers, {} tickets committed",
            batch_id,
            created.tier_ids.len(),
            created.tickets_committed
        );
        self.delete_rows(batch_id).await
    }

    /// Batches whose persisted ticket count differs from their quantity, or
    /// that have no tiers at all
    pub async fn find_incomplete(
        &self,
        owner_id: &str,
    ) -> Result<Vec<IncompleteBatch>, StoreError> {
        let mut incomplete = Vec::new();
        for batch in self.repo.list_batches(owner_id).await? {
            let persisted_tickets = self.repo.count_tickets(batch.id).await?;
            let persisted_tiers = self.repo.count_tiers(batch.id).await?;

            if persisted_tiers == 0 || persisted_tickets != u64::from(batch.quantity) {
                incomplete.push(IncompleteBatch {
                    expected_tickets: batch.quantity,
                    persisted_tickets,
                    persisted_tiers,
                    batch,
                });
            }
        }
        Ok(incomplete)
    }

    async fn delete_rows(&self, batch_id: Uuid) -> Result<DeletionReport, DeleteError> {
        let tickets_deleted = self
            .repo
            .delete_tickets(batch_id)
            .await
            .map_err(|source| DeleteError::Stage {
                stage: DeleteStage::Tickets,
                batch_id,
                source,
            })?;
        let tiers_deleted = self
            .repo
            .delete_tiers(batch_id)
            .await
            .map_err(|source| DeleteError::Stage {
                stage: DeleteStage::Tiers,
                batch_id,
                source,
            })?;
        let batch_deleted = self
            .repo
            .delete_batch(batch_id)
            .await
            .map_err(|source| DeleteError::Stage {
                stage: DeleteStage::Batch,
                batch_id,
                source,
            })?;

        Ok(DeletionReport {
            tickets_deleted,
            tiers_deleted,
            batch_deleted,
        })
    }
}

/// One run's writes: batch row, tier rows, then tickets in fixed-size chunks.
///
/// Each chunk is an independent request. A failed chunk leaves earlier
/// chunks committed; the error names the chunk index.
pub struct IssuanceSaga<'g> {
    gateway: &'g PersistenceGateway,
    created: CreatedRecords,
    pending: Vec<NewTicket>,
    dispatched: usize,
}

impl<'g> IssuanceSaga<'g> {
    pub fn created(&self) -> &CreatedRecords {
        &self.created
    }

    pub fn into_created(self) -> CreatedRecords {
        self.created
    }

    /// Stage 1. Nothing else may run if this fails.
    pub async fn create_batch(
        &mut self,
        request: &NewBatch,
        aggregates: &BatchAggregates,
    ) -> Result<EventBatch, PersistError> {
        let batch = self
            .gateway
            .repo
            .insert_batch(
                &request.owner_id,
                &request.details,
                aggregates.price,
                aggregates.quantity,
            )
            .await
            .map_err(|source| PersistError::Batch { source })?;

        self.created.batch_id = Some(batch.id);
        info!("Created batch {} '{}' ({} tickets)", batch.id, batch.title, batch.quantity);
        Ok(batch)
    }

    /// Stage 2. All tiers in one request; the batch row stays if this fails.
    pub async fn create_tiers(
        &mut self,
        batch_id: Uuid,
        tiers: &[TierInput],
    ) -> Result<TierMapping, PersistError> {
        let inserted = self
            .gateway
            .repo
            .insert_tiers(batch_id, tiers)
            .await
            .map_err(|source| PersistError::Tiers { batch_id, source })?;

        self.created.tier_ids = inserted.iter().map(|t| t.id).collect();
        debug!("Inserted {} tiers for batch {}", inserted.len(), batch_id);
        let mapping = TierMapping::from_inserted(tiers, inserted)
            .map_err(|source| PersistError::Mapping { batch_id, source })?;
        Ok(mapping)
    }

    /// Stage 3. Buffer one ticket, sending a chunk once the buffer is full.
    /// Returns the number of rows the store accepted (0 if nothing was sent).
    pub async fn push(&mut self, ticket: NewTicket) -> Result<usize, PersistError> {
        self.pending.push(ticket);
        if self.pending.len() >= self.gateway.chunk_size {
            self.flush().await
        } else {
            Ok(0)
        }
    }

    /// Send whatever is buffered as one chunk
    pub async fn flush(&mut self) -> Result<usize, PersistError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let chunk = self.created.chunks_committed;
        let batch_id = self.pending[0].batch_id;
        let rows = std::mem::take(&mut self.pending);
        self.dispatched += rows.len();

        let accepted = self
            .gateway
            .repo
            .insert_tickets(&rows)
            .await
            .map_err(|source| PersistError::TicketChunk {
                batch_id,
                chunk,
                source,
            })?;

        self.created.chunks_committed += 1;
        self.created.tickets_committed += accepted;
        if accepted != rows.len() {
            warn!(
                "Chunk {} for batch {}: sent {} rows, store accepted {}",
                chunk,
                batch_id,
                rows.len(),
                accepted
            );
        }
        Ok(accepted)
    }

    /// Drop buffered rows that were never sent
    pub fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Post-condition: every dispatched row was accepted
    pub fn verify(&self) -> Result<(), PersistError> {
        if self.created.tickets_committed != self.dispatched {
            return Err(PersistError::CountMismatch {
                batch_id: self.created.batch_id.unwrap_or_default(),
                expected: self.dispatched,
                accepted: self.created.tickets_committed,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStage {
    Tickets,
    Tiers,
    Batch,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("Batch insert failed: {source}")]
    Batch { source: StoreError },

    #[error("Tier insert failed for batch {batch_id}: {source}")]
    Tiers { batch_id: Uuid, source: StoreError },

    #[error("Tier mapping failed for batch {batch_id}: {source}")]
    Mapping { batch_id: Uuid, source: IssuanceError },

    #[error("Ticket chunk {chunk} failed for batch {batch_id}: {source}")]
    TicketChunk {
        batch_id: Uuid,
        chunk: usize,
        source: StoreError,
    },

    #[error("Batch {batch_id}: expected {expected} ticket rows, store accepted {accepted}")]
    CountMismatch {
        batch_id: Uuid,
        expected: usize,
        accepted: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("Batch not found: {0}")]
    NotFound(Uuid),

    #[error("Could not look up batch {batch_id}: {source}")]
    Lookup { batch_id: Uuid, source: StoreError },

    #[error("Deleting {stage:?} for batch {batch_id} failed: {source}")]
    Stage {
        stage: DeleteStage,
        batch_id: Uuid,
        source: StoreError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use turnstile_core::StoreResult;
    use turnstile_shared::{EventDetails, IndividualTicket, PricingTier};
    use turnstile_store::memory::InMemoryTicketRepository;

    /// Delegates to the in-memory store, failing selected calls
    #[derive(Default)]
    struct FlakyRepository {
        inner: InMemoryTicketRepository,
        fail_tiers: bool,
        fail_chunk: Option<usize>,
        drop_last_row: bool,
        fail_delete_tiers: bool,
        chunk_calls: AtomicUsize,
    }

    #[async_trait]
    impl TicketRepository for FlakyRepository {
        async fn insert_batch(
            &self,
            owner_id: &str,
            details: &EventDetails,
            price: f64,
            quantity: u32,
        ) -> StoreResult<EventBatch> {
            self.inner.insert_batch(owner_id, details, price, quantity).await
        }

        async fn insert_tiers(
            &self,
            batch_id: Uuid,
            tiers: &[TierInput],
        ) -> StoreResult<Vec<PricingTier>> {
            if self.fail_tiers {
                return Err(StoreError::Backend("tier insert rejected".to_string()));
            }
            self.inner.insert_tiers(batch_id, tiers).await
        }

        async fn insert_tickets(&self, tickets: &[NewTicket]) -> StoreResult<usize> {
            let call = self.chunk_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_chunk == Some(call) {
                return Err(StoreError::Unavailable("request timed out".to_string()));
            }
            if self.drop_last_row && tickets.len() > 1 {
                return self.inner.insert_tickets(&tickets[..tickets.len() - 1]).await;
            }
            self.inner.insert_tickets(tickets).await
        }

        async fn set_document_url(&self, batch_id: Uuid, url: &str) -> StoreResult<()> {
            self.inner.set_document_url(batch_id, url).await
        }

        async fn list_batches(&self, owner_id: &str) -> StoreResult<Vec<EventBatch>> {
            self.inner.list_batches(owner_id).await
        }

        async fn get_batch(
            &self,
            owner_id: &str,
            batch_id: Uuid,
        ) -> StoreResult<Option<BatchDetail>> {
            self.inner.get_batch(owner_id, batch_id).await
        }

        async fn count_tickets(&self, batch_id: Uuid) -> StoreResult<u64> {
            self.inner.count_tickets(batch_id).await
        }

        async fn count_tiers(&self, batch_id: Uuid) -> StoreResult<u64> {
            self.inner.count_tiers(batch_id).await
        }

        async fn list_tickets(&self, owner_id: &str) -> StoreResult<Vec<IndividualTicket>> {
            self.inner.list_tickets(owner_id).await
        }

        async fn get_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<IndividualTicket>> {
            self.inner.get_ticket(ticket_id).await
        }

        async fn mark_used(
            &self,
            ticket_id: Uuid,
            at: DateTime<Utc>,
        ) -> StoreResult<Option<IndividualTicket>> {
            self.inner.mark_used(ticket_id, at).await
        }

        async fn delete_tickets(&self, batch_id: Uuid) -> StoreResult<u64> {
            self.inner.delete_tickets(batch_id).await
        }

        async fn delete_tiers(&self, batch_id: Uuid) -> StoreResult<u64> {
            if self.fail_delete_tiers {
                return Err(StoreError::Backend("foreign key violation".to_string()));
            }
            self.inner.delete_tiers(batch_id).await
        }

        async fn delete_batch(&self, batch_id: Uuid) -> StoreResult<bool> {
            self.inner.delete_batch(batch_id).await
        }
    }

    fn request() -> NewBatch {
        NewBatch {
            owner_id: "organizer-1".to_string(),
            details: EventDetails {
                title: "Harbour Derby".to_string(),
                event_date: "2026-11-21".to_string(),
                start_time: "19:30".to_string(),
                end_time: "21:30".to_string(),
                ..Default::default()
            },
            tiers: vec![TierInput::new("VIP", 100.0, 2), TierInput::new("Standard", 50.0, 3)],
        }
    }

    fn rows(batch_id: Uuid, tier_id: Uuid, count: u32) -> Vec<NewTicket> {
        (1..=count)
            .map(|n| NewTicket {
                id: Uuid::new_v4(),
                batch_id,
                tier_id,
                ticket_number: n,
                ticket_code: format!("TKT-TEST-{:06}", n),
                qr_payload: format!("payload-{}", n),
                qr_image: None,
                seat_section: None,
                seat_row: None,
                seat_number: Some(n.to_string()),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_three_stage_write_in_chunks() {
        let repo = Arc::new(FlakyRepository::default());
        let gateway = PersistenceGateway::new(repo.clone(), 2);
        let req = request();
        let agg = BatchAggregates::from_tiers(&req.tiers).unwrap();

        let mut saga = gateway.begin();
        let batch = saga.create_batch(&req, &agg).await.unwrap();
        let mapping = saga.create_tiers(batch.id, &req.tiers).await.unwrap();
        assert_eq!(mapping.tier_ids().len(), 2);

        let mut accepted = 0;
        for row in rows(batch.id, mapping.tier_ids()[0], 5) {
            accepted += saga.push(row).await.unwrap();
        }
        accepted += saga.flush().await.unwrap();
        saga.verify().unwrap();

        assert_eq!(accepted, 5);
        assert_eq!(saga.created().chunks_committed, 3);
        assert_eq!(repo.chunk_calls.load(Ordering::SeqCst), 3);
        assert_eq!(repo.count_tickets(batch.id).await.unwrap(), 5);
        assert_eq!(batch.quantity, 5);
        assert!((batch.price - 70.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tier_failure_leaves_orphan_batch() {
        let repo = Arc::new(FlakyRepository {
            fail_tiers: true,
            ..Default::default()
        });
        let gateway = PersistenceGateway::new(repo.clone(), 100);
        let req = request();
        let agg = BatchAggregates::from_tiers(&req.tiers).unwrap();

        let mut saga = gateway.begin();
        let batch = saga.create_batch(&req, &agg).await.unwrap();
        let err = saga.create_tiers(batch.id, &req.tiers).await.unwrap_err();
        assert!(matches!(err, PersistError::Tiers { .. }));

        let created = saga.into_created();
        assert_eq!(created.batch_id, Some(batch.id));
        assert!(created.tier_ids.is_empty());

        // Orphan is visible to reconciliation until compensated
        let incomplete = gateway.find_incomplete("organizer-1").await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].persisted_tiers, 0);

        let report = gateway.compensate(&created).await.unwrap();
        assert!(report.batch_deleted);
        assert!(gateway.find_incomplete("organizer-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunk_failure_names_chunk_and_keeps_prior_rows() {
        let repo = Arc::new(FlakyRepository {
            fail_chunk: Some(1),
            ..Default::default()
        });
        let gateway = PersistenceGateway::new(repo.clone(), 2);
        let req = request();
        let agg = BatchAggregates::from_tiers(&req.tiers).unwrap();

        let mut saga = gateway.begin();
        let batch = saga.create_batch(&req, &agg).await.unwrap();
        let mapping = saga.create_tiers(batch.id, &req.tiers).await.unwrap();

        let mut failure = None;
        for row in rows(batch.id, mapping.tier_ids()[0], 5) {
            if let Err(e) = saga.push(row).await {
                failure = Some(e);
                break;
            }
        }

        match failure {
            Some(PersistError::TicketChunk { chunk, .. }) => assert_eq!(chunk, 1),
            other => panic!("expected chunk failure, got {:?}", other),
        }
        assert_eq!(saga.created().tickets_committed, 2);
        assert_eq!(repo.count_tickets(batch.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_silent_partial_acceptance_is_reported() {
        let repo = Arc::new(FlakyRepository {
            drop_last_row: true,
            ..Default::default()
        });
        let gateway = PersistenceGateway::new(repo, 100);
        let req = request();
        let agg = BatchAggregates::from_tiers(&req.tiers).unwrap();

        let mut saga = gateway.begin();
        let batch = saga.create_batch(&req, &agg).await.unwrap();
        let mapping = saga.create_tiers(batch.id, &req.tiers).await.unwrap();
        for row in rows(batch.id, mapping.tier_ids()[1], 5) {
            saga.push(row).await.unwrap();
        }
        saga.flush().await.unwrap();

        match saga.verify() {
            Err(PersistError::CountMismatch { expected, accepted, .. }) => {
                assert_eq!(expected, 5);
                assert_eq!(accepted, 4);
            }
            other => panic!("expected count mismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resending_a_chunk_does_not_duplicate() {
        let repo = Arc::new(InMemoryTicketRepository::new());
        let gateway = PersistenceGateway::new(repo.clone(), 100);
        let req = request();
        let agg = BatchAggregates::from_tiers(&req.tiers).unwrap();

        let mut saga = gateway.begin();
        let batch = saga.create_batch(&req, &agg).await.unwrap();
        let mapping = saga.create_tiers(batch.id, &req.tiers).await.unwrap();
        let chunk = rows(batch.id, mapping.tier_ids()[0], 3);

        assert_eq!(repo.insert_tickets(&chunk).await.unwrap(), 3);
        assert_eq!(repo.insert_tickets(&chunk).await.unwrap(), 0);
        assert_eq!(repo.count_tickets(batch.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_in_reverse_order_and_stage_failure() {
        let repo = Arc::new(FlakyRepository {
            fail_delete_tiers: true,
            ..Default::default()
        });
        let gateway = PersistenceGateway::new(repo.clone(), 100);
        let req = request();
        let agg = BatchAggregates::from_tiers(&req.tiers).unwrap();

        let mut saga = gateway.begin();
        let batch = saga.create_batch(&req, &agg).await.unwrap();
        let mapping = saga.create_tiers(batch.id, &req.tiers).await.unwrap();
        for row in rows(batch.id, mapping.tier_ids()[0], 2) {
            saga.push(row).await.unwrap();
        }
        saga.flush().await.unwrap();

        let err = gateway.delete_batch("organizer-1", batch.id).await.unwrap_err();
        assert!(matches!(err, DeleteError::Stage { stage: DeleteStage::Tiers, .. }));

        // Tickets went first; tiers and batch are still there
        assert_eq!(repo.count_tickets(batch.id).await.unwrap(), 0);
        assert_eq!(repo.count_tiers(batch.id).await.unwrap(), 2);
        assert!(repo.get_batch("organizer-1", batch.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_scoped_to_owner() {
        let repo = Arc::new(InMemoryTicketRepository::new());
        let gateway = PersistenceGateway::new(repo.clone(), 100);
        let req = request();
        let agg = BatchAggregates::from_tiers(&req.tiers).unwrap();

        let mut saga = gateway.begin();
        let batch = saga.create_batch(&req, &agg).await.unwrap();

        assert!(matches!(
            gateway.delete_batch("someone-else", batch.id).await,
            Err(DeleteError::NotFound(_))
        ));
        let report = gateway.delete_batch("organizer-1", batch.id).await.unwrap();
        assert!(report.batch_deleted);
        assert!(repo.list_batches("organizer-1").await.unwrap().is_empty());
    }
}
