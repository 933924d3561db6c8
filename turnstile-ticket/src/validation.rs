use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use turnstile_core::{StoreError, TicketRepository};
use turnstile_shared::IndividualTicket;
use uuid::Uuid;

use crate::codec::{self, ScanCode};

/// Result of one scan. Rejections are ordinary outcomes, not errors.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanOutcome {
    Accepted {
        ticket: IndividualTicket,
    },
    AlreadyUsed {
        ticket: IndividualTicket,
        validated_at: Option<DateTime<Utc>>,
    },
    NotFound,
}

impl ScanOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanOutcome::Accepted { .. } => "accepted",
            ScanOutcome::AlreadyUsed { .. } => "already_used",
            ScanOutcome::NotFound => "not_found",
        }
    }
}

/// Resolves scanned strings against one owner's tickets and admits each
/// ticket at most once.
///
/// Keeps an in-memory view of the known tickets that is updated as soon as
/// a scan is accepted. The durable write is a conditional update, so two
/// scanners racing on the same ticket cannot both be accepted.
pub struct ValidationResolver {
    repo: Arc<dyn TicketRepository>,
    owner_id: String,
    view: RwLock<Vec<IndividualTicket>>,
}

impl ValidationResolver {
    /// Load the owner's current ticket set
    pub async fn load(
        repo: Arc<dyn TicketRepository>,
        owner_id: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let owner_id = owner_id.into();
        let tickets = repo.list_tickets(&owner_id).await?;
        Ok(Self {
            repo,
            owner_id,
            view: RwLock::new(tickets),
        })
    }

    pub async fn known_tickets(&self) -> usize {
        self.view.read().await.len()
    }

    /// Replace the view with the store's current state
    pub async fn refresh(&self) -> Result<usize, StoreError> {
        let tickets = self.repo.list_tickets(&self.owner_id).await?;
        let count = tickets.len();
        *self.view.write().await = tickets;
        Ok(count)
    }

    pub async fn validate(&self, raw: &str) -> Result<ScanOutcome, StoreError> {
        let code = codec::decode(raw).ok();
        if let Some(ScanCode::Structured(payload)) = &code {
            if !codec::verify(payload) {
                warn!("Checksum mismatch for scanned ticket {}", payload.ticket_id);
            }
        }

        let batch_id = match &code {
            Some(ScanCode::Structured(payload)) => Uuid::parse_str(&payload.batch_id).ok(),
            _ => None,
        };
        let mut found = self.lookup(raw, code.as_ref(), batch_id).await;
        if found.is_none() {
            // Tickets issued after this view was loaded
            let reference = code
                .as_ref()
                .map_or_else(|| raw.trim().to_string(), ScanCode::ticket_ref);
            found = self.repo.find_ticket(&self.owner_id, &reference, batch_id).await?;
            if let Some(ticket) = &found {
                self.remember(ticket).await;
            }
        }
        let Some(ticket) = found else {
            info!("Scan rejected: no ticket matches");
            return Ok(ScanOutcome::NotFound);
        };

        if ticket.is_used {
            return Ok(already_used(ticket));
        }

        let now = Utc::now();
        match self.repo.mark_used(ticket.id, now).await? {
            Some(updated) => {
                self.remember(&updated).await;
                info!("Ticket {} (#{}) admitted", updated.ticket_code, updated.ticket_number);
                Ok(ScanOutcome::Accepted { ticket: updated })
            }
            None => {
                // Another scanner got there first
                let current = self.repo.get_ticket(ticket.id).await?;
                match current {
                    Some(current) => {
                        self.remember(&current).await;
                        Ok(already_used(current))
                    }
                    None => Ok(ScanOutcome::NotFound),
                }
            }
        }
    }

    async fn lookup(
        &self,
        raw: &str,
        code: Option<&ScanCode>,
        batch_id: Option<Uuid>,
    ) -> Option<IndividualTicket> {
        let view = self.view.read().await;
        match code {
            // Codes only carry a short batch prefix, so the payload's batch id disambiguates
            Some(ScanCode::Structured(payload)) => view
                .iter()
                .filter(|t| batch_id.map_or(true, |b| t.batch_id == b))
                .find(|t| {
                    t.ticket_code == payload.ticket_id || t.id.to_string() == payload.ticket_id
                })
                .cloned(),
            _ => {
                let raw = raw.trim();
                view.iter().find(|t| t.matches_literal(raw)).cloned()
            }
        }
    }

    async fn remember(&self, ticket: &IndividualTicket) {
        let mut view = self.view.write().await;
        match view.iter_mut().find(|t| t.id == ticket.id) {
            Some(slot) => *slot = ticket.clone(),
            None => view.push(ticket.clone()),
        }
    }
}

fn already_used(ticket: IndividualTicket) -> ScanOutcome {
    info!(
        "Scan rejected: ticket {} already used at {:?}",
        ticket.ticket_code, ticket.validated_at
    );
    ScanOutcome::AlreadyUsed {
        validated_at: ticket.validated_at,
        ticket,
    }
}
