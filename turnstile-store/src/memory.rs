use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use turnstile_core::{StoreError, StoreResult, TicketRepository};
use turnstile_shared::{
    BatchDetail, EventBatch, EventDetails, IndividualTicket, NewTicket, PricingTier, TierInput,
};
use uuid::Uuid;

/// Process-local repository used when no database is configured, and in tests.
/// Enforces the same references the relational schema does.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTicketRepository {
    inner: Arc<RwLock<Tables>>,
}

#[derive(Debug, Default)]
struct Tables {
    batches: Vec<EventBatch>,
    tiers: Vec<PricingTier>,
    tickets: Vec<IndividualTicket>,
    ticket_ids: HashSet<Uuid>,
}

impl Tables {
    fn batch(&self, batch_id: Uuid) -> Option<&EventBatch> {
        self.batches.iter().find(|b| b.id == batch_id)
    }

    fn owned_batch_ids(&self, owner_id: &str) -> Vec<Uuid> {
        self.batches
            .iter()
            .filter(|b| b.owner_id == owner_id)
            .map(|b| b.id)
            .collect()
    }
}

impl InMemoryTicketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketRepository for InMemoryTicketRepository {
    async fn insert_batch(
        &self,
        owner_id: &str,
        details: &EventDetails,
        price: f64,
        quantity: u32,
    ) -> StoreResult<EventBatch> {
        let batch = EventBatch {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            title: details.title.clone(),
            description: details.description.clone(),
            event_date: details.event_date.clone(),
            start_time: details.start_time.clone(),
            end_time: details.end_time.clone(),
            home_team: details.home_team.clone(),
            away_team: details.away_team.clone(),
            venue_name: details.venue_name.clone(),
            competition: details.competition.clone(),
            price,
            quantity,
            document_url: None,
            created_at: Utc::now(),
        };
        self.inner.write().await.batches.push(batch.clone());
        Ok(batch)
    }

    async fn insert_tiers(
        &self,
        batch_id: Uuid,
        tiers: &[TierInput],
    ) -> StoreResult<Vec<PricingTier>> {
        let mut tables = self.inner.write().await;
        if tables.batch(batch_id).is_none() {
            return Err(StoreError::Backend(format!("batch {} does not exist", batch_id)));
        }

        let now = Utc::now();
        let rows: Vec<PricingTier> = tiers
            .iter()
            .map(|t| PricingTier {
                id: Uuid::new_v4(),
                batch_id,
                name: t.name.clone(),
                price: t.price,
                quantity: t.quantity,
                description: t.description.clone(),
                created_at: now,
            })
            .collect();
        tables.tiers.extend(rows.iter().cloned());
        Ok(rows)
    }

    async fn insert_tickets(&self, tickets: &[NewTicket]) -> StoreResult<usize> {
        let mut tables = self.inner.write().await;
        for ticket in tickets {
            if tables.batch(ticket.batch_id).is_none() {
                return Err(StoreError::Backend(format!(
                    "batch {} does not exist",
                    ticket.batch_id
                )));
            }
            if !tables.tiers.iter().any(|t| t.id == ticket.tier_id) {
                return Err(StoreError::Backend(format!("tier {} does not exist", ticket.tier_id)));
            }
        }

        let now = Utc::now();
        let mut accepted = 0;
        for ticket in tickets {
            if tables.ticket_ids.insert(ticket.id) {
                tables.tickets.push(ticket.clone().into_ticket(now));
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    async fn set_document_url(&self, batch_id: Uuid, url: &str) -> StoreResult<()> {
        let mut tables = self.inner.write().await;
        let batch = tables
            .batches
            .iter_mut()
            .find(|b| b.id == batch_id)
            .ok_or_else(|| StoreError::NotFound(format!("batch {}", batch_id)))?;
        batch.document_url = Some(url.to_string());
        Ok(())
    }

    async fn list_batches(&self, owner_id: &str) -> StoreResult<Vec<EventBatch>> {
        let tables = self.inner.read().await;
        // Later inserts win ties on created_at
        let mut batches: Vec<EventBatch> = tables
            .batches
            .iter()
            .rev()
            .filter(|b| b.owner_id == owner_id)
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(batches)
    }

    async fn get_batch(&self, owner_id: &str, batch_id: Uuid) -> StoreResult<Option<BatchDetail>> {
        let tables = self.inner.read().await;
        let Some(batch) = tables.batch(batch_id).filter(|b| b.owner_id == owner_id) else {
            return Ok(None);
        };

        let tiers = tables.tiers.iter().filter(|t| t.batch_id == batch_id).cloned().collect();
        let mut tickets: Vec<IndividualTicket> = tables
            .tickets
            .iter()
            .filter(|t| t.batch_id == batch_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.ticket_number);

        Ok(Some(BatchDetail {
            batch: batch.clone(),
            tiers,
            tickets,
        }))
    }

    async fn count_tickets(&self, batch_id: Uuid) -> StoreResult<u64> {
        let tables = self.inner.read().await;
        Ok(tables.tickets.iter().filter(|t| t.batch_id == batch_id).count() as u64)
    }

    async fn count_tiers(&self, batch_id: Uuid) -> StoreResult<u64> {
        let tables = self.inner.read().await;
        Ok(tables.tiers.iter().filter(|t| t.batch_id == batch_id).count() as u64)
    }

    async fn list_tickets(&self, owner_id: &str) -> StoreResult<Vec<IndividualTicket>> {
        let tables = self.inner.read().await;
        let owned = tables.owned_batch_ids(owner_id);

        let mut tickets: Vec<IndividualTicket> = tables
            .tickets
            .iter()
            .filter(|t| owned.contains(&t.batch_id))
            .cloned()
            .collect();
        tickets.sort_by_key(|t| {
            let position = owned.iter().position(|id| *id == t.batch_id).unwrap_or(usize::MAX);
            (position, t.ticket_number)
        });
        Ok(tickets)
    }

    async fn get_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<IndividualTicket>> {
        let tables = self.inner.read().await;
        Ok(tables.tickets.iter().find(|t| t.id == ticket_id).cloned())
    }

    async fn find_ticket(
        &self,
        owner_id: &str,
        reference: &str,
        batch_id: Option<Uuid>,
    ) -> StoreResult<Option<IndividualTicket>> {
        let tables = self.inner.read().await;
        let owned = tables.owned_batch_ids(owner_id);
        let by_id = Uuid::parse_str(reference).ok();

        Ok(tables
            .tickets
            .iter()
            .filter(|t| owned.contains(&t.batch_id))
            .filter(|t| batch_id.map_or(true, |b| t.batch_id == b))
            .find(|t| t.ticket_code == reference || Some(t.id) == by_id)
            .cloned())
    }

    async fn mark_used(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<IndividualTicket>> {
        let mut tables = self.inner.write().await;
        match tables.tickets.iter_mut().find(|t| t.id == ticket_id && !t.is_used) {
            Some(ticket) => {
                ticket.mark_used(at);
                Ok(Some(ticket.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_tickets(&self, batch_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.inner.write().await;
        let before = tables.tickets.len();
        let Tables { tickets, ticket_ids, .. } = &mut *tables;
        tickets.retain(|t| {
            let keep = t.batch_id != batch_id;
            if !keep {
                ticket_ids.remove(&t.id);
            }
            keep
        });
        Ok((before - tables.tickets.len()) as u64)
    }

    async fn delete_tiers(&self, batch_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.inner.write().await;
        if tables.tickets.iter().any(|t| t.batch_id == batch_id) {
            return Err(StoreError::Backend(format!(
                "tiers of batch {} are still referenced by tickets",
                batch_id
            )));
        }
        let before = tables.tiers.len();
        tables.tiers.retain(|t| t.batch_id != batch_id);
        Ok((before - tables.tiers.len()) as u64)
    }

    async fn delete_batch(&self, batch_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.inner.write().await;
        if tables.tiers.iter().any(|t| t.batch_id == batch_id) {
            return Err(StoreError::Backend(format!(
                "batch {} is still referenced by tiers",
                batch_id
            )));
        }
        let before = tables.batches.len();
        tables.batches.retain(|b| b.id != batch_id);
        Ok(tables.batches.len() < before)
    }
}
