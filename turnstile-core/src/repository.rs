use async_trait::async_trait;
use chrono::{DateTime, Utc};
use turnstile_shared::{
    BatchDetail, EventBatch, EventDetails, IndividualTicket, NewTicket, PricingTier, TierInput,
};
use uuid::Uuid;

use crate::StoreResult;

/// Access to the three related tables: event batches, pricing tiers and
/// individual tickets. There is no cross-call transaction; callers sequence
/// the writes themselves.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    /// Insert the batch row with precomputed aggregates; the store assigns the id
    async fn insert_batch(
        &self,
        owner_id: &str,
        details: &EventDetails,
        price: f64,
        quantity: u32,
    ) -> StoreResult<EventBatch>;

    /// Insert all tiers in one request. Returned rows keep input order.
    async fn insert_tiers(
        &self,
        batch_id: Uuid,
        tiers: &[TierInput],
    ) -> StoreResult<Vec<PricingTier>>;

    /// Insert one chunk of tickets, returning how many rows were newly accepted.
    /// Rows whose id already exists are skipped.
    async fn insert_tickets(&self, tickets: &[NewTicket]) -> StoreResult<usize>;

    async fn set_document_url(&self, batch_id: Uuid, url: &str) -> StoreResult<()>;

    /// Batches owned by `owner_id`, newest first
    async fn list_batches(&self, owner_id: &str) -> StoreResult<Vec<EventBatch>>;

    /// One batch with its tiers and tickets, scoped to the owner
    async fn get_batch(&self, owner_id: &str, batch_id: Uuid) -> StoreResult<Option<BatchDetail>>;

    async fn count_tickets(&self, batch_id: Uuid) -> StoreResult<u64>;

    async fn count_tiers(&self, batch_id: Uuid) -> StoreResult<u64>;

    /// Every ticket across the owner's batches, ordered by batch then number
    async fn list_tickets(&self, owner_id: &str) -> StoreResult<Vec<IndividualTicket>>;

    async fn get_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<IndividualTicket>>;

    /// One of the owner's tickets by row id or ticket code, optionally
    /// restricted to a single batch.
    ///
    /// The default scans [`list_tickets`](Self::list_tickets); stores with an
    /// index on the code should override it.
    async fn find_ticket(
        &self,
        owner_id: &str,
        reference: &str,
        batch_id: Option<Uuid>,
    ) -> StoreResult<Option<IndividualTicket>> {
        let tickets = self.list_tickets(owner_id).await?;
        Ok(tickets.into_iter().find(|t| {
            batch_id.map_or(true, |b| t.batch_id == b)
                && (t.ticket_code == reference || t.id.to_string() == reference)
        }))
    }

    /// Conditional update: set the used flag only if it is currently unset.
    /// `None` means no row changed (unknown id or already used).
    async fn mark_used(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<IndividualTicket>>;

    async fn delete_tickets(&self, batch_id: Uuid) -> StoreResult<u64>;

    async fn delete_tiers(&self, batch_id: Uuid) -> StoreResult<u64>;

    /// Returns false if no such batch existed
    async fn delete_batch(&self, batch_id: Uuid) -> StoreResult<bool>;
}
