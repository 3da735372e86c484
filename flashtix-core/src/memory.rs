//! In-process store implementations for tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flashtix_shared::{SeatKey, Ticket, TicketStatus};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::repository::{
    AcquireOutcome, ExpiredReservation, ExtendOutcome, LeaseStore, TicketStore, TransitionOutcome,
};
use crate::{StoreError, StoreResult};

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
}

struct LeaseEntry {
    holder: String,
    expires_at: Instant,
}

impl LeaseEntry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Lease store backed by a mutex-guarded map. Expired entries are treated as
/// absent and dropped lazily.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, LeaseEntry>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired leases.
    pub fn live_count(&self) -> usize {
        let now = Instant::now();
        self.leases
            .lock()
            .map(|leases| leases.values().filter(|e| e.live(now)).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<AcquireOutcome> {
        let now = Instant::now();
        let mut leases = lock(&self.leases)?;
        if let Some(existing) = leases.get(key).filter(|e| e.live(now)) {
            return Ok(AcquireOutcome::AlreadyHeld { holder: Some(existing.holder.clone()) });
        }
        leases.insert(
            key.to_string(),
            LeaseEntry { holder: holder.to_string(), expires_at: now + ttl },
        );
        debug!("Lease acquired: {} -> {}", key, holder);
        Ok(AcquireOutcome::Acquired)
    }

    async fn release(&self, key: &str) -> StoreResult<()> {
        lock(&self.leases)?.remove(key);
        Ok(())
    }

    async fn release_held(&self, key: &str, holder: &str) -> StoreResult<bool> {
        let now = Instant::now();
        let mut leases = lock(&self.leases)?;
        let owned = leases
            .get(key)
            .map(|e| e.live(now) && e.holder == holder)
            .unwrap_or(false);
        if owned {
            leases.remove(key);
        }
        Ok(owned)
    }

    async fn extend_ttl(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<ExtendOutcome> {
        let now = Instant::now();
        let mut leases = lock(&self.leases)?;
        match leases.get_mut(key) {
            Some(entry) if entry.live(now) && entry.holder == holder => {
                entry.expires_at = now + ttl;
                Ok(ExtendOutcome::Extended)
            }
            _ => Ok(ExtendOutcome::NotHeld),
        }
    }

    async fn read(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        let leases = lock(&self.leases)?;
        Ok(leases.get(key).filter(|e| e.live(now)).map(|e| e.holder.clone()))
    }
}

/// Ticket store backed by a mutex-guarded map keyed by `(event_id, seat)`.
#[derive(Default)]
pub struct InMemoryTicketStore {
    tickets: Mutex<HashMap<SeatKey, Ticket>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `Available` tickets for the given seats of one event.
    pub fn provision(&self, event_id: &str, seats: &[&str], price: f64) {
        if let Ok(mut tickets) = self.tickets.lock() {
            for seat in seats {
                let key = SeatKey::new(event_id, *seat);
                tickets.insert(key.clone(), Ticket::available(&key, price));
            }
        }
    }

    /// Stores a row as-is, bypassing every precondition.
    pub fn put(&self, ticket: Ticket) {
        if let Ok(mut tickets) = self.tickets.lock() {
            tickets.insert(ticket.key(), ticket);
        }
    }

    fn transition<F>(&self, key: &SeatKey, apply: F) -> StoreResult<TransitionOutcome>
    where
        F: FnOnce(&mut Ticket) -> bool,
    {
        let mut tickets = lock(&self.tickets)?;
        let Some(ticket) = tickets.get_mut(key) else {
            return Ok(TransitionOutcome::PreconditionFailed);
        };
        if !apply(ticket) {
            return Ok(TransitionOutcome::PreconditionFailed);
        }
        ticket.updated_at = Utc::now();
        Ok(TransitionOutcome::Applied)
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn conditional_reserve(
        &self,
        key: &SeatKey,
        holder: &str,
        until: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.transition(key, |t| {
            if t.status != TicketStatus::Available {
                return false;
            }
            t.status = TicketStatus::Reserved;
            t.holder = Some(holder.to_string());
            t.reserved_until = Some(until);
            true
        })
    }

    async fn conditional_extend(
        &self,
        key: &SeatKey,
        holder: &str,
        until: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.transition(key, |t| {
            if !t.is_held_by(holder) {
                return false;
            }
            t.reserved_until = Some(until);
            true
        })
    }

    async fn conditional_confirm(&self, key: &SeatKey, holder: &str) -> StoreResult<TransitionOutcome> {
        self.transition(key, |t| {
            if !t.is_held_by(holder) {
                return false;
            }
            t.status = TicketStatus::Sold;
            t.holder = None;
            t.reserved_until = None;
            true
        })
    }

    async fn conditional_release(
        &self,
        key: &SeatKey,
        expected_holder: Option<&str>,
    ) -> StoreResult<TransitionOutcome> {
        self.transition(key, |t| {
            if t.status != TicketStatus::Reserved {
                return false;
            }
            if let Some(expected) = expected_holder {
                if t.holder.as_deref() != Some(expected) {
                    return false;
                }
            }
            t.status = TicketStatus::Available;
            t.holder = None;
            t.reserved_until = None;
            true
        })
    }

    async fn release_expired(
        &self,
        key: &SeatKey,
        holder: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<TransitionOutcome> {
        self.transition(key, |t| {
            let expired = t.reserved_until.is_some_and(|until| until < now);
            if !t.is_held_by(holder) || !expired {
                return false;
            }
            t.status = TicketStatus::Available;
            t.holder = None;
            t.reserved_until = None;
            true
        })
    }

    async fn scan_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<ExpiredReservation>> {
        let tickets = lock(&self.tickets)?;
        let mut expired: Vec<ExpiredReservation> = tickets
            .values()
            .filter(|t| t.status == TicketStatus::Reserved)
            .filter_map(|t| match (&t.holder, t.reserved_until) {
                (Some(holder), Some(until)) if until < now => Some(ExpiredReservation {
                    key: t.key(),
                    holder: holder.clone(),
                    reserved_until: until,
                }),
                _ => None,
            })
            .collect();
        expired.sort_by_key(|e| e.reserved_until);
        expired.truncate(limit);
        Ok(expired)
    }

    async fn get(&self, key: &SeatKey) -> StoreResult<Option<Ticket>> {
        Ok(lock(&self.tickets)?.get(key).cloned())
    }

    async fn list_event(&self, event_id: &str) -> StoreResult<Vec<Ticket>> {
        let tickets = lock(&self.tickets)?;
        let mut seats: Vec<Ticket> = tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        seats.sort_by(|a, b| a.seat.cmp(&b.seat));
        Ok(seats)
    }
}
