use chrono::{DateTime, Utc};
use flashtix_core::{CoreError, CoreResult, ExtendOutcome, LeaseStore, TicketStore, TransitionOutcome};
use flashtix_shared::{SeatEvent, SeatEventKind, SeatKey, Ticket, TicketStatus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::guard::{Acquisition, LeaseGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationConfig {
    /// Lease TTL and `reserved_until` offset. Both use the same window so
    /// they expire together.
    pub hold: Duration,
    /// Upper bound on tickets cleared per reconcile pass.
    pub reconcile_batch_size: usize,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(600),
            reconcile_batch_size: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub event_id: String,
    pub seat: String,
    pub holder: String,
    pub reserved_until: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub released: usize,
    /// Already confirmed, released or re-reserved by the time we got to it.
    pub skipped: usize,
    pub failed: usize,
}

/// Drives a seat through its lifecycle across the lease store and the
/// ticket store.
pub struct ReservationCoordinator {
    leases: Arc<dyn LeaseStore>,
    tickets: Arc<dyn TicketStore>,
    config: ReservationConfig,
    events: Option<broadcast::Sender<SeatEvent>>,
}

impl ReservationCoordinator {
    pub fn new(leases: Arc<dyn LeaseStore>, tickets: Arc<dyn TicketStore>, config: ReservationConfig) -> Self {
        Self {
            leases,
            tickets,
            config,
            events: None,
        }
    }

    /// Publishes every successful transition to `tx`.
    pub fn with_events(mut self, tx: broadcast::Sender<SeatEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    /// Claims a seat for `holder` for the configured hold window.
    ///
    /// A second call by the current holder renews the hold instead of
    /// conflicting with itself.
    pub async fn reserve(&self, key: &SeatKey, holder: &str) -> CoreResult<Reservation> {
        let lease_key = key.lease_key();
        let guard = match LeaseGuard::acquire(self.leases.clone(), &lease_key, holder, self.config.hold).await? {
            Acquisition::Acquired(guard) => guard,
            Acquisition::Held { holder: Some(current) } if current == holder => {
                return self.renew(key, holder).await;
            }
            Acquisition::Held { .. } => {
                debug!("Seat {} already leased, rejecting {}", key, holder);
                return Err(CoreError::Conflict(format!("seat {} is held by another customer", key)));
            }
        };

        let until = self.hold_deadline();
        if self.tickets.conditional_reserve(key, holder, until).await?.applied() {
            guard.commit();
            return Ok(self.reserved(key, holder, until, SeatEventKind::Reserved));
        }

        // An earlier attempt by the same holder may have landed before its
        // response was lost; realign the expiry with the fresh lease.
        let current = self.tickets.get(key).await?;
        if current.as_ref().is_some_and(|t| t.is_held_by(holder))
            && self.tickets.conditional_extend(key, holder, until).await?.applied()
        {
            guard.commit();
            return Ok(self.reserved(key, holder, until, SeatEventKind::Reserved));
        }

        guard.release().await;
        Err(self.classify(key, current))
    }

    /// Finalizes the purchase of a seat currently reserved by `holder`.
    pub async fn confirm(&self, key: &SeatKey, holder: &str) -> CoreResult<()> {
        let lease_key = key.lease_key();
        match self.leases.read(&lease_key).await? {
            Some(current) if current == holder => {}
            _ => {
                return Err(CoreError::NotHeld(format!("{} holds no lease on seat {}", holder, key)));
            }
        }

        // Looked up by the composite key, never by a surrogate id
        let outcome = self.tickets.conditional_confirm(key, holder).await?;
        if !outcome.applied() {
            let current = self.tickets.get(key).await?;
            if current.as_ref().is_some_and(|t| t.status == TicketStatus::Sold) {
                // A sold seat must not keep a live lease; the row itself is untouched
                error!("INVARIANT VIOLATION on seat {}: SOLD with a live lease held by {}, dropping the lease", key, holder);
                self.drop_lease(&lease_key, key).await;
            }
            return Err(self.classify(key, current));
        }

        self.drop_lease(&lease_key, key).await;
        info!("Seat {} sold to {}", key, holder);
        self.publish(SeatEvent::new(SeatEventKind::Sold, key, Some(holder)));
        Ok(())
    }

    /// Returns a reserved seat to the pool. Releasing a seat that is not
    /// reserved (or not reserved by `holder`, when given) is a no-op.
    pub async fn release(&self, key: &SeatKey, holder: Option<&str>) -> CoreResult<()> {
        let lease_key = key.lease_key();
        let outcome = self.tickets.conditional_release(key, holder).await?;

        match (outcome, holder) {
            (TransitionOutcome::Applied, Some(holder)) => {
                self.leases.release_held(&lease_key, holder).await?;
            }
            (TransitionOutcome::Applied, None) => {
                self.leases.release(&lease_key).await?;
            }
            // Clear a stale lease the caller still owns from an interrupted reserve
            (TransitionOutcome::PreconditionFailed, Some(holder)) => {
                self.leases.release_held(&lease_key, holder).await?;
            }
            (TransitionOutcome::PreconditionFailed, None) => {}
        }

        if outcome.applied() {
            info!("Seat {} released", key);
            self.publish(SeatEvent::new(SeatEventKind::Released, key, holder));
        } else {
            debug!("Release of {} was a no-op", key);
        }
        Ok(())
    }

    /// Pushes the hold window of a reservation owned by `holder` forward.
    pub async fn extend(&self, key: &SeatKey, holder: &str) -> CoreResult<Reservation> {
        let lease_key = key.lease_key();
        if self.leases.extend_ttl(&lease_key, holder, self.config.hold).await? == ExtendOutcome::NotHeld {
            return Err(CoreError::NotHeld(format!("{} holds no lease on seat {}", holder, key)));
        }

        let until = self.hold_deadline();
        if !self.tickets.conditional_extend(key, holder, until).await?.applied() {
            let current = self.tickets.get(key).await?;
            return Err(self.classify(key, current));
        }

        Ok(self.reserved(key, holder, until, SeatEventKind::Extended))
    }

    /// One sweep of reservations whose hold window passed before `now`.
    pub async fn reconcile_once(&self, now: DateTime<Utc>) -> CoreResult<ReconcileReport> {
        let expired = self.tickets.scan_expired(now, self.config.reconcile_batch_size).await?;
        let mut report = ReconcileReport {
            scanned: expired.len(),
            ..ReconcileReport::default()
        };

        for entry in expired {
            // Re-checks expiry so a hold renewed since the scan is kept
            match self.tickets.release_expired(&entry.key, &entry.holder, now).await {
                Ok(TransitionOutcome::Applied) => {
                    report.released += 1;
                    info!("Expired reservation of {} by {} cleared", entry.key, entry.holder);
                    // The lease has most likely lapsed on its own already
                    if let Err(e) = self.leases.release_held(&entry.key.lease_key(), &entry.holder).await {
                        debug!("Lease cleanup for {} failed: {}", entry.key, e);
                    }
                    self.publish(SeatEvent::new(SeatEventKind::Released, &entry.key, Some(&entry.holder)));
                }
                Ok(TransitionOutcome::PreconditionFailed) => report.skipped += 1,
                Err(e) => {
                    warn!("Failed to clear expired reservation {}: {}", entry.key, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Same-holder path of `reserve`: the caller already owns the lease.
    async fn renew(&self, key: &SeatKey, holder: &str) -> CoreResult<Reservation> {
        let lease_key = key.lease_key();
        if self.leases.extend_ttl(&lease_key, holder, self.config.hold).await? == ExtendOutcome::NotHeld {
            return Err(CoreError::Conflict(format!("lease on seat {} lapsed, retry", key)));
        }

        let until = self.hold_deadline();
        // Ticket may still be AVAILABLE if an earlier attempt died after the lease step
        if self.tickets.conditional_reserve(key, holder, until).await?.applied()
            || self.tickets.conditional_extend(key, holder, until).await?.applied()
        {
            return Ok(self.reserved(key, holder, until, SeatEventKind::Extended));
        }

        let current = self.tickets.get(key).await?;
        if let Err(e) = self.leases.release_held(&lease_key, holder).await {
            warn!("Compensating release of lease {} failed, relying on TTL: {}", lease_key, e);
        }
        Err(self.classify(key, current))
    }

    fn reserved(&self, key: &SeatKey, holder: &str, until: DateTime<Utc>, kind: SeatEventKind) -> Reservation {
        info!("Seat {} reserved by {} until {}", key, holder, until);
        self.publish(SeatEvent::new(kind, key, Some(holder)).with_expiry(until));
        Reservation {
            event_id: key.event_id.clone(),
            seat: key.seat.clone(),
            holder: holder.to_string(),
            reserved_until: until,
        }
    }

    /// Explains why a conditional transition did not apply.
    fn classify(&self, key: &SeatKey, current: Option<Ticket>) -> CoreError {
        let Some(ticket) = current else {
            return CoreError::NotFound(format!("no ticket for seat {}", key));
        };
        if let Err(violation) = ticket.check_invariants() {
            error!("INVARIANT VIOLATION on seat {}: {}", key, violation);
            return CoreError::InvariantViolation(violation);
        }
        CoreError::Conflict(format!("seat {} is {}", key, ticket.status))
    }

    async fn drop_lease(&self, lease_key: &str, key: &SeatKey) {
        if let Err(e) = self.leases.release(lease_key).await {
            warn!("Failed to drop lease for sold seat {}, relying on TTL: {}", key, e);
        }
    }

    fn hold_deadline(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.config.hold)
            .ok()
            .and_then(|hold| Utc::now().checked_add_signed(hold))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn publish(&self, event: SeatEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }
}
