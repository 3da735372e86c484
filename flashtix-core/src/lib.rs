pub mod memory;
pub mod repository;

use std::time::Duration;

pub use memory::{InMemoryLeaseStore, InMemoryTicketStore};
pub use repository::{
    AcquireOutcome, ExpiredReservation, ExtendOutcome, LeaseStore, TicketStore, TransitionOutcome,
};

/// Outcome taxonomy of the reservation core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Seat unavailable or a precondition no longer holds. Not retried.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Caller does not hold a valid lease for the seat.
    #[error("Lease not held: {0}")]
    NotHeld(String),
    #[error("Ticket not found: {0}")]
    NotFound(String),
    /// Store I/O failed or timed out; the whole operation is safe to retry.
    #[error("Transient store failure: {0}")]
    Transient(String),
    /// Stored state the model forbids. Never repaired automatically.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Failure raised by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{op} exceeded deadline of {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt(msg) => CoreError::InvariantViolation(msg),
            other => CoreError::Transient(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
