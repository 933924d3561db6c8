use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use turnstile_core::{StoreError, StoreResult, TicketRepository};
use turnstile_shared::{
    BatchDetail, EventBatch, EventDetails, IndividualTicket, NewTicket, PricingTier, TierInput,
};
use uuid::Uuid;

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BATCH_COLUMNS: &str = "id, owner_id, title, description, event_date, start_time, end_time, \
     home_team, away_team, venue_name, competition, price, quantity, document_url, created_at";

const TIER_COLUMNS: &str = "id, batch_id, position, name, price, quantity, description, created_at";

const TICKET_COLUMNS: &str = "id, batch_id, tier_id, ticket_number, ticket_code, qr_payload, qr_image, \
     is_used, validated_at, seat_section, seat_row, seat_number, created_at";

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    owner_id: String,
    title: String,
    description: Option<String>,
    event_date: String,
    start_time: String,
    end_time: String,
    home_team: Option<String>,
    away_team: Option<String>,
    venue_name: Option<String>,
    competition: Option<String>,
    price: f64,
    quantity: i32,
    document_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<BatchRow> for EventBatch {
    fn from(row: BatchRow) -> Self {
        EventBatch {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            description: row.description,
            event_date: row.event_date,
            start_time: row.start_time,
            end_time: row.end_time,
            home_team: row.home_team,
            away_team: row.away_team,
            venue_name: row.venue_name,
            competition: row.competition,
            price: row.price,
            quantity: to_u32(row.quantity),
            document_url: row.document_url,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TierRow {
    id: Uuid,
    batch_id: Uuid,
    position: i32,
    name: String,
    price: f64,
    quantity: i32,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TierRow> for PricingTier {
    fn from(row: TierRow) -> Self {
        PricingTier {
            id: row.id,
            batch_id: row.batch_id,
            name: row.name,
            price: row.price,
            quantity: to_u32(row.quantity),
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    batch_id: Uuid,
    tier_id: Uuid,
    ticket_number: i32,
    ticket_code: String,
    qr_payload: String,
    qr_image: Option<String>,
    is_used: bool,
    validated_at: Option<DateTime<Utc>>,
    seat_section: Option<String>,
    seat_row: Option<String>,
    seat_number: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TicketRow> for IndividualTicket {
    fn from(row: TicketRow) -> Self {
        IndividualTicket {
            id: row.id,
            batch_id: row.batch_id,
            tier_id: row.tier_id,
            ticket_number: to_u32(row.ticket_number),
            ticket_code: row.ticket_code,
            qr_payload: row.qr_payload,
            qr_image: row.qr_image,
            is_used: row.is_used,
            validated_at: row.validated_at,
            seat_section: row.seat_section,
            seat_row: row.seat_row,
            seat_number: row.seat_number,
            created_at: row.created_at,
        }
    }
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn to_i32(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| StoreError::Backend(format!("{} does not fit an INTEGER column", value)))
}

/// Ticket columns prefixed with the `t` alias for joined queries
fn qualified_ticket_columns() -> String {
    TICKET_COLUMNS
        .split(", ")
        .map(|c| format!("t.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn store_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound(e.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn insert_batch(
        &self,
        owner_id: &str,
        details: &EventDetails,
        price: f64,
        quantity: u32,
    ) -> StoreResult<EventBatch> {
        let sql = format!(
            r#"
            INSERT INTO event_batches (owner_id, title, description, event_date, start_time, end_time,
                                       home_team, away_team, venue_name, competition, price, quantity)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            BATCH_COLUMNS
        );
        let row: BatchRow = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(&details.title)
            .bind(&details.description)
            .bind(&details.event_date)
            .bind(&details.start_time)
            .bind(&details.end_time)
            .bind(&details.home_team)
            .bind(&details.away_team)
            .bind(&details.venue_name)
            .bind(&details.competition)
            .bind(price)
            .bind(to_i32(quantity)?)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(row.into())
    }

    async fn insert_tiers(
        &self,
        batch_id: Uuid,
        tiers: &[TierInput],
    ) -> StoreResult<Vec<PricingTier>> {
        let positions: Vec<i32> = (0..tiers.len() as i32).collect();
        let names: Vec<String> = tiers.iter().map(|t| t.name.clone()).collect();
        let prices: Vec<f64> = tiers.iter().map(|t| t.price).collect();
        let quantities = tiers.iter().map(|t| to_i32(t.quantity)).collect::<StoreResult<Vec<i32>>>()?;
        let descriptions: Vec<Option<String>> = tiers.iter().map(|t| t.description.clone()).collect();

        let sql = format!(
            r#"
            INSERT INTO pricing_tiers (batch_id, position, name, price, quantity, description)
            SELECT $1, t.position, t.name, t.price, t.quantity, t.description
            FROM UNNEST($2::int4[], $3::text[], $4::float8[], $5::int4[], $6::text[])
                AS t(position, name, price, quantity, description)
            RETURNING {}
            "#,
            TIER_COLUMNS
        );
        let mut rows: Vec<TierRow> = sqlx::query_as(&sql)
            .bind(batch_id)
            .bind(&positions)
            .bind(&names)
            .bind(&prices)
            .bind(&quantities)
            .bind(&descriptions)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        // RETURNING order is not guaranteed
        rows.sort_by_key(|r| r.position);
        Ok(rows.into_iter().map(PricingTier::from).collect())
    }

    async fn insert_tickets(&self, tickets: &[NewTicket]) -> StoreResult<usize> {
        if tickets.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = tickets.iter().map(|t| t.id).collect();
        let batch_ids: Vec<Uuid> = tickets.iter().map(|t| t.batch_id).collect();
        let tier_ids: Vec<Uuid> = tickets.iter().map(|t| t.tier_id).collect();
        let numbers = tickets
            .iter()
            .map(|t| to_i32(t.ticket_number))
            .collect::<StoreResult<Vec<i32>>>()?;
        let codes: Vec<String> = tickets.iter().map(|t| t.ticket_code.clone()).collect();
        let payloads: Vec<String> = tickets.iter().map(|t| t.qr_payload.clone()).collect();
        let images: Vec<Option<String>> = tickets.iter().map(|t| t.qr_image.clone()).collect();
        let sections: Vec<Option<String>> = tickets.iter().map(|t| t.seat_section.clone()).collect();
        let seat_rows: Vec<Option<String>> = tickets.iter().map(|t| t.seat_row.clone()).collect();
        let seat_numbers: Vec<Option<String>> = tickets.iter().map(|t| t.seat_number.clone()).collect();

        // Ids are generated before sending, so a resent chunk is a no-op
        let result = sqlx::query(
            r#"
            INSERT INTO individual_tickets (id, batch_id, tier_id, ticket_number, ticket_code, qr_payload,
                                            qr_image, seat_section, seat_row, seat_number)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[], $4::int4[], $5::text[], $6::text[],
                                 $7::text[], $8::text[], $9::text[], $10::text[])
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&ids)
        .bind(&batch_ids)
        .bind(&tier_ids)
        .bind(&numbers)
        .bind(&codes)
        .bind(&payloads)
        .bind(&images)
        .bind(&sections)
        .bind(&seat_rows)
        .bind(&seat_numbers)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() as usize)
    }

    async fn set_document_url(&self, batch_id: Uuid, url: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE event_batches SET document_url = $1 WHERE id = $2")
            .bind(url)
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("batch {}", batch_id)));
        }
        Ok(())
    }

    async fn list_batches(&self, owner_id: &str) -> StoreResult<Vec<EventBatch>> {
        let sql = format!(
            "SELECT {} FROM event_batches WHERE owner_id = $1 ORDER BY created_at DESC",
            BATCH_COLUMNS
        );
        let rows: Vec<BatchRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(EventBatch::from).collect())
    }

    async fn get_batch(&self, owner_id: &str, batch_id: Uuid) -> StoreResult<Option<BatchDetail>> {
        let sql = format!(
            "SELECT {} FROM event_batches WHERE id = $1 AND owner_id = $2",
            BATCH_COLUMNS
        );
        let batch: Option<BatchRow> = sqlx::query_as(&sql)
            .bind(batch_id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        let Some(batch) = batch else {
            return Ok(None);
        };

        let sql = format!(
            "SELECT {} FROM pricing_tiers WHERE batch_id = $1 ORDER BY position",
            TIER_COLUMNS
        );
        let tiers: Vec<TierRow> = sqlx::query_as(&sql)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        let sql = format!(
            "SELECT {} FROM individual_tickets WHERE batch_id = $1 ORDER BY ticket_number",
            TICKET_COLUMNS
        );
        let tickets: Vec<TicketRow> = sqlx::query_as(&sql)
            .bind(batch_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;

        Ok(Some(BatchDetail {
            batch: batch.into(),
            tiers: tiers.into_iter().map(PricingTier::from).collect(),
            tickets: tickets.into_iter().map(IndividualTicket::from).collect(),
        }))
    }

    async fn count_tickets(&self, batch_id: Uuid) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM individual_tickets WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(count.max(0) as u64)
    }

    async fn count_tiers(&self, batch_id: Uuid) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pricing_tiers WHERE batch_id = $1")
            .bind(batch_id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(count.max(0) as u64)
    }

    async fn list_tickets(&self, owner_id: &str) -> StoreResult<Vec<IndividualTicket>> {
        let columns = qualified_ticket_columns();
        let sql = format!(
            r#"
            SELECT {}
            FROM individual_tickets t
            JOIN event_batches b ON b.id = t.batch_id
            WHERE b.owner_id = $1
            ORDER BY b.created_at, t.ticket_number
            "#,
            columns
        );
        let rows: Vec<TicketRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows.into_iter().map(IndividualTicket::from).collect())
    }

    async fn get_ticket(&self, ticket_id: Uuid) -> StoreResult<Option<IndividualTicket>> {
        let sql = format!("SELECT {} FROM individual_tickets WHERE id = $1", TICKET_COLUMNS);
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(IndividualTicket::from))
    }

    async fn find_ticket(
        &self,
        owner_id: &str,
        reference: &str,
        batch_id: Option<Uuid>,
    ) -> StoreResult<Option<IndividualTicket>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM individual_tickets t
            JOIN event_batches b ON b.id = t.batch_id
            WHERE b.owner_id = $1
              AND (t.ticket_code = $2 OR t.id = $3)
              AND ($4::uuid IS NULL OR t.batch_id = $4)
            ORDER BY b.created_at
            LIMIT 1
            "#,
            qualified_ticket_columns()
        );
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(owner_id)
            .bind(reference)
            .bind(Uuid::parse_str(reference).ok())
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(IndividualTicket::from))
    }

    async fn mark_used(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<IndividualTicket>> {
        // Only one concurrent caller can flip the flag
        let sql = format!(
            r#"
            UPDATE individual_tickets
            SET is_used = TRUE, validated_at = $2
            WHERE id = $1 AND is_used = FALSE
            RETURNING {}
            "#,
            TICKET_COLUMNS
        );
        let row: Option<TicketRow> = sqlx::query_as(&sql)
            .bind(ticket_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(row.map(IndividualTicket::from))
    }

    async fn delete_tickets(&self, batch_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM individual_tickets WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_tiers(&self, batch_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM pricing_tiers WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_batch(&self, batch_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM event_batches WHERE id = $1")
            .bind(batch_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(result.rows_affected() > 0)
    }
}
