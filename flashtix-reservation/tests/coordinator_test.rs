use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use flashtix_core::{
    AcquireOutcome, CoreError, ExpiredReservation, ExtendOutcome, InMemoryLeaseStore, InMemoryTicketStore,
    LeaseStore, StoreError, StoreResult, TicketStore, TransitionOutcome,
};
use flashtix_reservation::{ReconcileReport, Reconciler, ReservationConfig, ReservationCoordinator};
use flashtix_shared::{SeatEventKind, SeatKey, Ticket, TicketStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

struct Fixture {
    coordinator: Arc<ReservationCoordinator>,
    leases: Arc<InMemoryLeaseStore>,
    tickets: Arc<InMemoryTicketStore>,
}

fn fixture(hold: Duration) -> Fixture {
    let leases = Arc::new(InMemoryLeaseStore::new());
    let tickets = Arc::new(InMemoryTicketStore::new());
    tickets.provision("E1", &["A1", "A2"], 50.0);

    let config = ReservationConfig { hold, reconcile_batch_size: 100 };
    let coordinator = ReservationCoordinator::new(leases.clone(), tickets.clone(), config);
    Fixture { coordinator: Arc::new(coordinator), leases, tickets }
}

fn seat() -> SeatKey {
    SeatKey::new("E1", "A1")
}

async fn ticket(tickets: &InMemoryTicketStore, key: &SeatKey) -> Ticket {
    tickets.get(key).await.unwrap().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reserves_have_one_winner() {
    let fx = fixture(Duration::from_secs(60));
    let mut handles = Vec::new();

    for i in 0..16 {
        let coordinator = fx.coordinator.clone();
        handles.push(tokio::spawn(async move {
            let holder = format!("u{}", i);
            let result = coordinator.reserve(&seat(), &holder).await;
            (holder, result)
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (holder, result) = handle.await.unwrap();
        match result {
            Ok(_) => winners.push(holder),
            Err(CoreError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(winners.len(), 1);
    let stored = ticket(&fx.tickets, &seat()).await;
    assert_eq!(stored.status, TicketStatus::Reserved);
    assert_eq!(stored.holder.as_deref(), Some(winners[0].as_str()));
    assert_eq!(fx.leases.read(&seat().lease_key()).await.unwrap(), Some(winners[0].clone()));
}

#[tokio::test]
async fn test_two_customers_race_then_winner_confirms() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();

    let (first, second) = tokio::join!(fx.coordinator.reserve(&key, "u1"), fx.coordinator.reserve(&key, "u2"));
    let winner = match (&first, &second) {
        (Ok(r), Err(CoreError::Conflict(_))) | (Err(CoreError::Conflict(_)), Ok(r)) => r.holder.clone(),
        other => panic!("expected one Ok and one Conflict, got {:?}", other),
    };

    fx.coordinator.confirm(&key, &winner).await.unwrap();
    assert_eq!(ticket(&fx.tickets, &key).await.status, TicketStatus::Sold);
}

#[tokio::test]
async fn test_reserve_then_confirm_sells_and_drops_lease() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();

    let reservation = fx.coordinator.reserve(&key, "u1").await.unwrap();
    assert_eq!(reservation.holder, "u1");
    assert!(reservation.reserved_until > Utc::now());

    fx.coordinator.confirm(&key, "u1").await.unwrap();

    let stored = ticket(&fx.tickets, &key).await;
    assert_eq!(stored.status, TicketStatus::Sold);
    assert_eq!(stored.holder, None);
    assert_eq!(stored.reserved_until, None);
    assert_eq!(fx.leases.read(&key.lease_key()).await.unwrap(), None);
}

#[tokio::test]
async fn test_second_reserve_conflicts_and_leaves_ticket_alone() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();

    let first = fx.coordinator.reserve(&key, "u1").await.unwrap();
    let err = fx.coordinator.reserve(&key, "u2").await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let stored = ticket(&fx.tickets, &key).await;
    assert_eq!(stored.holder.as_deref(), Some("u1"));
    assert_eq!(stored.reserved_until, Some(first.reserved_until));
}

#[tokio::test]
async fn test_sold_seat_is_terminal() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();
    fx.coordinator.reserve(&key, "u1").await.unwrap();
    fx.coordinator.confirm(&key, "u1").await.unwrap();

    let err = fx.coordinator.reserve(&key, "u2").await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    // Compensation released the lease taken for the failed attempt
    assert_eq!(fx.leases.read(&key.lease_key()).await.unwrap(), None);

    assert!(matches!(fx.coordinator.confirm(&key, "u1").await, Err(CoreError::NotHeld(_))));
    fx.coordinator.release(&key, None).await.unwrap();
    assert_eq!(ticket(&fx.tickets, &key).await.status, TicketStatus::Sold);
}

#[tokio::test]
async fn test_confirm_on_sold_seat_drops_leftover_lease() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();
    fx.coordinator.reserve(&key, "u1").await.unwrap();
    fx.tickets.conditional_confirm(&key, "u1").await.unwrap();
    let sold = ticket(&fx.tickets, &key).await;

    let err = fx.coordinator.confirm(&key, "u1").await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(fx.leases.read(&key.lease_key()).await.unwrap(), None);
    assert_eq!(ticket(&fx.tickets, &key).await, sold);
}

#[tokio::test]
async fn test_confirm_without_lease_is_not_held() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();

    let err = fx.coordinator.confirm(&key, "u1").await.unwrap_err();
    assert!(matches!(err, CoreError::NotHeld(_)));
    assert_eq!(ticket(&fx.tickets, &key).await.status, TicketStatus::Available);

    fx.coordinator.reserve(&key, "u1").await.unwrap();
    let err = fx.coordinator.confirm(&key, "u2").await.unwrap_err();
    assert!(matches!(err, CoreError::NotHeld(_)));
    assert_eq!(ticket(&fx.tickets, &key).await.holder.as_deref(), Some("u1"));
}

#[tokio::test]
async fn test_confirm_after_lease_expiry_is_not_held() {
    let fx = fixture(Duration::from_millis(100));
    let key = seat();
    fx.coordinator.reserve(&key, "u1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = fx.coordinator.confirm(&key, "u1").await.unwrap_err();
    assert!(matches!(err, CoreError::NotHeld(_)));
    assert_eq!(ticket(&fx.tickets, &key).await.status, TicketStatus::Reserved);
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();
    fx.coordinator.reserve(&key, "u1").await.unwrap();

    fx.coordinator.release(&key, Some("u1")).await.unwrap();
    let after_first = ticket(&fx.tickets, &key).await;
    assert_eq!(after_first.status, TicketStatus::Available);
    assert_eq!(fx.leases.live_count(), 0);

    fx.coordinator.release(&key, Some("u1")).await.unwrap();
    assert_eq!(ticket(&fx.tickets, &key).await, after_first);

    let untouched = SeatKey::new("E1", "A2");
    fx.coordinator.release(&untouched, None).await.unwrap();
    assert_eq!(ticket(&fx.tickets, &untouched).await.status, TicketStatus::Available);
}

#[tokio::test]
async fn test_release_by_other_holder_changes_nothing() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();
    fx.coordinator.reserve(&key, "u1").await.unwrap();

    fx.coordinator.release(&key, Some("u2")).await.unwrap();

    assert_eq!(ticket(&fx.tickets, &key).await.holder.as_deref(), Some("u1"));
    assert_eq!(fx.leases.read(&key.lease_key()).await.unwrap().as_deref(), Some("u1"));
}

#[tokio::test]
async fn test_expired_reservation_is_reconciled() {
    let fx = fixture(Duration::from_secs(1));
    let key = seat();
    fx.coordinator.reserve(&key, "u1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let report = fx.coordinator.reconcile_once(Utc::now()).await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.released, 1);
    let stored = ticket(&fx.tickets, &key).await;
    assert_eq!(stored.status, TicketStatus::Available);
    assert!(stored.check_invariants().is_ok());

    let reservation = fx.coordinator.reserve(&key, "u2").await.unwrap();
    assert_eq!(reservation.holder, "u2");
}

#[tokio::test]
async fn test_reconcile_leaves_live_reservations() {
    let fx = fixture(Duration::from_secs(60));
    fx.coordinator.reserve(&seat(), "u1").await.unwrap();

    let report = fx.coordinator.reconcile_once(Utc::now()).await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(ticket(&fx.tickets, &seat()).await.status, TicketStatus::Reserved);
}

#[tokio::test]
async fn test_reconciler_task_sweeps_until_shutdown() {
    let fx = fixture(Duration::from_millis(100));
    let key = seat();
    fx.coordinator.reserve(&key, "u1").await.unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = Reconciler::new(fx.coordinator.clone(), Duration::from_millis(50)).spawn(shutdown_rx);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(ticket(&fx.tickets, &key).await.status, TicketStatus::Available);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reserve_unknown_seat_is_not_found() {
    let fx = fixture(Duration::from_secs(60));
    let key = SeatKey::new("E1", "Z99");

    let err = fx.coordinator.reserve(&key, "u1").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
    assert_eq!(fx.leases.live_count(), 0);
}

#[tokio::test]
async fn test_broken_row_is_reported_not_repaired() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();
    let mut broken = Ticket::available(&key, 50.0);
    broken.status = TicketStatus::Reserved;
    broken.holder = Some("ghost".to_string());
    fx.tickets.put(broken.clone());

    let err = fx.coordinator.reserve(&key, "u1").await.unwrap_err();
    assert!(matches!(err, CoreError::InvariantViolation(_)));
    assert_eq!(ticket(&fx.tickets, &key).await, broken);
    assert_eq!(fx.leases.live_count(), 0);
}

#[tokio::test]
async fn test_reserve_again_by_holder_renews() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();

    let first = fx.coordinator.reserve(&key, "u1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = fx.coordinator.reserve(&key, "u1").await.unwrap();

    assert!(second.reserved_until > first.reserved_until);
    assert_eq!(ticket(&fx.tickets, &key).await.reserved_until, Some(second.reserved_until));
}

#[tokio::test]
async fn test_extend_requires_holder() {
    let fx = fixture(Duration::from_secs(60));
    let key = seat();
    let first = fx.coordinator.reserve(&key, "u1").await.unwrap();

    assert!(matches!(fx.coordinator.extend(&key, "u2").await, Err(CoreError::NotHeld(_))));

    tokio::time::sleep(Duration::from_millis(10)).await;
    let extended = fx.coordinator.extend(&key, "u1").await.unwrap();
    assert!(extended.reserved_until > first.reserved_until);
}

#[tokio::test]
async fn test_transitions_are_broadcast() {
    let (tx, mut rx) = broadcast::channel(16);
    let leases = Arc::new(InMemoryLeaseStore::new());
    let tickets = Arc::new(InMemoryTicketStore::new());
    tickets.provision("E1", &["A1"], 50.0);
    let coordinator = ReservationCoordinator::new(leases, tickets, ReservationConfig::default()).with_events(tx);

    coordinator.reserve(&seat(), "u1").await.unwrap();
    coordinator.confirm(&seat(), "u1").await.unwrap();

    let reserved = rx.recv().await.unwrap();
    assert_eq!(reserved.kind, SeatEventKind::Reserved);
    assert!(reserved.reserved_until.is_some());
    assert_eq!(rx.recv().await.unwrap().kind, SeatEventKind::Sold);
}

/// Delegates to the in-memory store but can fail or stall individual calls.
struct FaultyTicketStore {
    inner: Arc<InMemoryTicketStore>,
    fail_reserve: bool,
    stall_reserve: bool,
    fail_scan: bool,
    fail_release: Option<SeatKey>,
    /// Lets each scanned holder renew before `scan_expired` returns.
    renew_after_scan: Option<Arc<InMemoryLeaseStore>>,
}

impl FaultyTicketStore {
    fn new(inner: Arc<InMemoryTicketStore>) -> Self {
        Self {
            inner,
            fail_reserve: false,
            stall_reserve: false,
            fail_scan: false,
            fail_release: None,
            renew_after_scan: None,
        }
    }
}

fn io_failure() -> StoreError {
    StoreError::backend(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset"))
}

#[async_trait]
impl TicketStore for FaultyTicketStore {
    async fn conditional_reserve(&self, key: &SeatKey, holder: &str, until: DateTime<Utc>) -> StoreResult<TransitionOutcome> {
        if self.stall_reserve {
            std::future::pending::<()>().await;
        }
        if self.fail_reserve {
            return Err(io_failure());
        }
        self.inner.conditional_reserve(key, holder, until).await
    }

    async fn conditional_extend(&self, key: &SeatKey, holder: &str, until: DateTime<Utc>) -> StoreResult<TransitionOutcome> {
        self.inner.conditional_extend(key, holder, until).await
    }

    async fn conditional_confirm(&self, key: &SeatKey, holder: &str) -> StoreResult<TransitionOutcome> {
        self.inner.conditional_confirm(key, holder).await
    }

    async fn conditional_release(&self, key: &SeatKey, expected_holder: Option<&str>) -> StoreResult<TransitionOutcome> {
        self.inner.conditional_release(key, expected_holder).await
    }

    async fn release_expired(&self, key: &SeatKey, holder: &str, now: DateTime<Utc>) -> StoreResult<TransitionOutcome> {
        if self.fail_release.as_ref() == Some(key) {
            return Err(io_failure());
        }
        self.inner.release_expired(key, holder, now).await
    }

    async fn scan_expired(&self, now: DateTime<Utc>, limit: usize) -> StoreResult<Vec<ExpiredReservation>> {
        if self.fail_scan {
            return Err(StoreError::Timeout { op: "scan_expired", after: Duration::from_secs(10) });
        }
        let expired = self.inner.scan_expired(now, limit).await?;

        if let Some(leases) = &self.renew_after_scan {
            for entry in &expired {
                leases.acquire(&entry.key.lease_key(), &entry.holder, Duration::from_secs(600)).await?;
                let until = Utc::now() + ChronoDuration::minutes(10);
                self.inner.conditional_extend(&entry.key, &entry.holder, until).await?;
            }
        }
        Ok(expired)
    }

    async fn get(&self, key: &SeatKey) -> StoreResult<Option<Ticket>> {
        self.inner.get(key).await
    }

    async fn list_event(&self, event_id: &str) -> StoreResult<Vec<Ticket>> {
        self.inner.list_event(event_id).await
    }
}

/// Delegates to the in-memory lease store but can fail holder-checked deletes.
struct FaultyLeaseStore {
    inner: Arc<InMemoryLeaseStore>,
    fail_release_held: bool,
}

#[async_trait]
impl LeaseStore for FaultyLeaseStore {
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<AcquireOutcome> {
        self.inner.acquire(key, holder, ttl).await
    }

    async fn release(&self, key: &str) -> StoreResult<()> {
        self.inner.release(key).await
    }

    async fn release_held(&self, key: &str, holder: &str) -> StoreResult<bool> {
        if self.fail_release_held {
            return Err(io_failure());
        }
        self.inner.release_held(key, holder).await
    }

    async fn extend_ttl(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<ExtendOutcome> {
        self.inner.extend_ttl(key, holder, ttl).await
    }

    async fn read(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.read(key).await
    }
}

fn faulty(configure: impl FnOnce(&mut FaultyTicketStore)) -> (ReservationCoordinator, Arc<InMemoryLeaseStore>, Arc<InMemoryTicketStore>) {
    let leases = Arc::new(InMemoryLeaseStore::new());
    let (coordinator, tickets) = faulty_with(leases.clone(), configure);
    (coordinator, leases, tickets)
}

fn faulty_with(
    leases: Arc<dyn LeaseStore>,
    configure: impl FnOnce(&mut FaultyTicketStore),
) -> (ReservationCoordinator, Arc<InMemoryTicketStore>) {
    let inner = Arc::new(InMemoryTicketStore::new());
    inner.provision("E1", &["A1", "A2"], 50.0);
    let mut store = FaultyTicketStore::new(inner.clone());
    configure(&mut store);

    let coordinator = ReservationCoordinator::new(leases, Arc::new(store), ReservationConfig::default());
    (coordinator, inner)
}

#[tokio::test]
async fn test_store_failure_is_transient_and_lease_is_released() {
    let (coordinator, leases, tickets) = faulty(|s| s.fail_reserve = true);

    let err = coordinator.reserve(&seat(), "u1").await.unwrap_err();
    assert!(matches!(err, CoreError::Transient(_)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(leases.live_count(), 0);
    assert_eq!(ticket(&tickets, &seat()).await.status, TicketStatus::Available);
}

#[tokio::test]
async fn test_cancelled_reserve_releases_lease() {
    let (coordinator, leases, _tickets) = faulty(|s| s.stall_reserve = true);

    let attempt = tokio::time::timeout(Duration::from_millis(50), coordinator.reserve(&seat(), "u1")).await;
    assert!(attempt.is_err(), "reserve should have been cancelled");

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(leases.read(&seat().lease_key()).await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_sweep_is_retried_not_fatal() {
    let (coordinator, _leases, _tickets) = faulty(|s| s.fail_scan = true);
    let reconciler = Reconciler::new(Arc::new(coordinator), Duration::from_secs(30));

    assert!(reconciler.sweep().await.is_none());
    assert!(reconciler.sweep().await.is_none());
}

#[tokio::test]
async fn test_hold_renewed_after_scan_survives_sweep() {
    let leases = Arc::new(InMemoryLeaseStore::new());
    let renewing = leases.clone();
    let (coordinator, tickets) = faulty_with(leases.clone(), |s| s.renew_after_scan = Some(renewing));
    let key = seat();
    let now = Utc::now();
    tickets.conditional_reserve(&key, "u1", now - ChronoDuration::seconds(5)).await.unwrap();

    let report = coordinator.reconcile_once(now).await.unwrap();
    assert_eq!(report, ReconcileReport { scanned: 1, released: 0, skipped: 1, failed: 0 });

    let stored = ticket(&tickets, &key).await;
    assert_eq!(stored.status, TicketStatus::Reserved);
    assert_eq!(stored.holder.as_deref(), Some("u1"));
    assert!(stored.reserved_until.is_some_and(|until| until > now));
    assert_eq!(leases.read(&key.lease_key()).await.unwrap().as_deref(), Some("u1"));
}

#[tokio::test]
async fn test_sweep_counts_failed_seat_and_continues() {
    let (coordinator, _leases, tickets) = faulty(|s| s.fail_release = Some(SeatKey::new("E1", "A1")));
    let a1 = SeatKey::new("E1", "A1");
    let a2 = SeatKey::new("E1", "A2");
    let past = Utc::now() - ChronoDuration::seconds(5);
    tickets.conditional_reserve(&a1, "u1", past).await.unwrap();
    tickets.conditional_reserve(&a2, "u2", past).await.unwrap();

    let report = coordinator.reconcile_once(Utc::now()).await.unwrap();
    assert_eq!(report, ReconcileReport { scanned: 2, released: 1, skipped: 0, failed: 1 });

    assert_eq!(ticket(&tickets, &a1).await.status, TicketStatus::Reserved);
    assert_eq!(ticket(&tickets, &a2).await.status, TicketStatus::Available);
}

#[tokio::test]
async fn test_failed_compensating_release_still_conflicts() {
    let leases = Arc::new(InMemoryLeaseStore::new());
    let lease_store = Arc::new(FaultyLeaseStore { inner: leases.clone(), fail_release_held: true });
    let (coordinator, tickets) = faulty_with(lease_store, |_| {});
    let key = seat();
    tickets.conditional_reserve(&key, "u1", Utc::now() + ChronoDuration::minutes(10)).await.unwrap();
    tickets.conditional_confirm(&key, "u1").await.unwrap();

    let err = coordinator.reserve(&key, "u2").await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    // Left to TTL expiry
    assert_eq!(leases.read(&key.lease_key()).await.unwrap().as_deref(), Some("u2"));

    // Renewal path by the same holder compensates the same way
    let err = coordinator.reserve(&key, "u2").await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert_eq!(ticket(&tickets, &key).await.status, TicketStatus::Sold);
}
