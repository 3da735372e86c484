use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flashtix_core::{
    ExpiredReservation, StoreError, StoreResult, TicketStore, TransitionOutcome,
};
use flashtix_shared::{SeatKey, Ticket, TicketStatus};
use sqlx::postgres::PgQueryResult;
use sqlx::PgPool;
use std::time::Duration;

use crate::deadline::within;

/// Postgres-backed ticket lifecycle. Each transition is one
/// `UPDATE ... WHERE <precondition>` statement; zero affected rows means the
/// precondition failed.
pub struct PgTicketStore {
    pool: PgPool,
    deadline: Duration,
}

impl PgTicketStore {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    event_id: String,
    seat: String,
    status: String,
    holder: Option<String>,
    reserved_until: Option<DateTime<Utc>>,
    price: f64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TicketStatus>()
            .map_err(|e| StoreError::Corrupt(format!("{}/{}: {}", row.event_id, row.seat, e)))?;
        Ok(Ticket {
            event_id: row.event_id,
            seat: row.seat,
            status,
            holder: row.holder,
            reserved_until: row.reserved_until,
            price: row.price,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ExpiredRow {
    event_id: String,
    seat: String,
    holder: String,
    reserved_until: DateTime<Utc>,
}

fn outcome(result: PgQueryResult) -> TransitionOutcome {
    if result.rows_affected() == 1 {
        TransitionOutcome::Applied
    } else {
        TransitionOutcome::PreconditionFailed
    }
}

#[async_trait]
impl TicketStore for PgTicketStore {
    async fn conditional_reserve(
        &self,
        key: &SeatKey,
        holder: &str,
        until: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let result = within(
            self.deadline,
            "conditional_reserve",
            sqlx::query(
                r#"
                UPDATE tickets
                SET status = 'RESERVED', holder = $3, reserved_until = $4, updated_at = NOW()
                WHERE event_id = $1 AND seat = $2 AND status = 'AVAILABLE'
                "#,
            )
            .bind(&key.event_id)
            .bind(&key.seat)
            .bind(holder)
            .bind(until)
            .execute(&self.pool),
        )
        .await?;
        Ok(outcome(result))
    }

    async fn conditional_extend(
        &self,
        key: &SeatKey,
        holder: &str,
        until: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let result = within(
            self.deadline,
            "conditional_extend",
            sqlx::query(
                r#"
                UPDATE tickets
                SET reserved_until = $4, updated_at = NOW()
                WHERE event_id = $1 AND seat = $2 AND status = 'RESERVED' AND holder = $3
                "#,
            )
            .bind(&key.event_id)
            .bind(&key.seat)
            .bind(holder)
            .bind(until)
            .execute(&self.pool),
        )
        .await?;
        Ok(outcome(result))
    }

    async fn conditional_confirm(&self, key: &SeatKey, holder: &str) -> StoreResult<TransitionOutcome> {
        let result = within(
            self.deadline,
            "conditional_confirm",
            sqlx::query(
                r#"
                UPDATE tickets
                SET status = 'SOLD', holder = NULL, reserved_until = NULL, updated_at = NOW()
                WHERE event_id = $1 AND seat = $2 AND status = 'RESERVED' AND holder = $3
                "#,
            )
            .bind(&key.event_id)
            .bind(&key.seat)
            .bind(holder)
            .execute(&self.pool),
        )
        .await?;
        Ok(outcome(result))
    }

    async fn conditional_release(
        &self,
        key: &SeatKey,
        expected_holder: Option<&str>,
    ) -> StoreResult<TransitionOutcome> {
        // A NULL $3 matches any holder
        let result = within(
            self.deadline,
            "conditional_release",
            sqlx::query(
                r#"
                UPDATE tickets
                SET status = 'AVAILABLE', holder = NULL, reserved_until = NULL, updated_at = NOW()
                WHERE event_id = $1 AND seat = $2 AND status = 'RESERVED'
                  AND ($3::TEXT IS NULL OR holder = $3)
                "#,
            )
            .bind(&key.event_id)
            .bind(&key.seat)
            .bind(expected_holder)
            .execute(&self.pool),
        )
        .await?;
        Ok(outcome(result))
    }

    async fn release_expired(
        &self,
        key: &SeatKey,
        holder: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        let result = within(
            self.deadline,
            "release_expired",
            sqlx::query(
                r#"
                UPDATE tickets
                SET status = 'AVAILABLE', holder = NULL, reserved_until = NULL, updated_at = NOW()
                WHERE event_id = $1 AND seat = $2 AND status = 'RESERVED'
                  AND holder = $3 AND reserved_until < $4
                "#,
            )
            .bind(&key.event_id)
            .bind(&key.seat)
            .bind(holder)
            .bind(now)
            .execute(&self.pool),
        )
        .await?;
        Ok(outcome(result))
    }

    async fn scan_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<ExpiredReservation>> {
        let rows: Vec<ExpiredRow> = within(
            self.deadline,
            "scan_expired",
            sqlx::query_as::<_, ExpiredRow>(
                r#"
                SELECT event_id, seat, holder, reserved_until
                FROM tickets
                WHERE status = 'RESERVED' AND reserved_until < $1 AND holder IS NOT NULL
                ORDER BY reserved_until
                LIMIT $2
                "#,
            )
            .bind(now)
            .bind(limit as i64)
            .fetch_all(&self.pool),
        )
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ExpiredReservation {
                key: SeatKey::new(row.event_id, row.seat),
                holder: row.holder,
                reserved_until: row.reserved_until,
            })
            .collect())
    }

    async fn get(&self, key: &SeatKey) -> StoreResult<Option<Ticket>> {
        let row: Option<TicketRow> = within(
            self.deadline,
            "get",
            sqlx::query_as::<_, TicketRow>(
                r#"
                SELECT event_id, seat, status, holder, reserved_until, price, updated_at
                FROM tickets
                WHERE event_id = $1 AND seat = $2
                "#,
            )
            .bind(&key.event_id)
            .bind(&key.seat)
            .fetch_optional(&self.pool),
        )
        .await?;

        row.map(Ticket::try_from).transpose()
    }

    async fn list_event(&self, event_id: &str) -> StoreResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = within(
            self.deadline,
            "list_event",
            sqlx::query_as::<_, TicketRow>(
                r#"
                SELECT event_id, seat, status, holder, reserved_until, price, updated_at
                FROM tickets
                WHERE event_id = $1
                ORDER BY seat
                "#,
            )
            .bind(event_id)
            .fetch_all(&self.pool),
        )
        .await?;

        rows.into_iter().map(Ticket::try_from).collect()
    }
}
