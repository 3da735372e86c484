use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flashtix_shared::{SeatKey, Ticket};
use serde::Serialize;
use std::time::Duration;

use crate::StoreResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    /// Someone already holds the key. The holder is `None` when it expired
    /// between the failed create and the read-back.
    AlreadyHeld { holder: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendOutcome {
    Extended,
    NotHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    PreconditionFailed,
}

impl TransitionOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// A reservation whose `reserved_until` has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiredReservation {
    pub key: SeatKey,
    pub holder: String,
    pub reserved_until: DateTime<Utc>,
}

/// Cluster-visible TTL key/value store providing per-seat mutual exclusion.
///
/// `acquire` must be a single atomic create-if-absent. Implementations bound
/// each call with a deadline and report overruns as `StoreError::Timeout`.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<AcquireOutcome>;

    /// Deletes the key. Deleting an absent key succeeds.
    async fn release(&self, key: &str) -> StoreResult<()>;

    /// Deletes the key only while `holder` owns it. Returns whether a delete happened.
    async fn release_held(&self, key: &str, holder: &str) -> StoreResult<bool>;

    /// Resets the TTL only while `holder` owns the key.
    async fn extend_ttl(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<ExtendOutcome>;

    async fn read(&self, key: &str) -> StoreResult<Option<String>>;
}

/// Durable seat lifecycle records. Every `conditional_*` call is one atomic
/// check-and-update against the `(event_id, seat)` row.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// `Available -> Reserved`.
    async fn conditional_reserve(
        &self,
        key: &SeatKey,
        holder: &str,
        until: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome>;

    /// `Reserved(holder) -> Reserved(holder)` with a new expiry.
    async fn conditional_extend(
        &self,
        key: &SeatKey,
        holder: &str,
        until: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome>;

    /// `Reserved(holder) -> Sold`.
    async fn conditional_confirm(&self, key: &SeatKey, holder: &str) -> StoreResult<TransitionOutcome>;

    /// `Reserved -> Available`, optionally only for `expected_holder`.
    async fn conditional_release(
        &self,
        key: &SeatKey,
        expected_holder: Option<&str>,
    ) -> StoreResult<TransitionOutcome>;

    /// `Reserved(holder) -> Available`, only while `reserved_until < now`.
    /// A hold renewed after it was scanned is left alone.
    async fn release_expired(
        &self,
        key: &SeatKey,
        holder: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome>;

    /// Reserved tickets with `reserved_until < now`, oldest first.
    async fn scan_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<ExpiredReservation>>;

    async fn get(&self, key: &SeatKey) -> StoreResult<Option<Ticket>>;

    async fn list_event(&self, event_id: &str) -> StoreResult<Vec<Ticket>>;
}
