pub mod coordinator;
pub mod guard;
pub mod reconciler;

pub use coordinator::{ReconcileReport, Reservation, ReservationConfig, ReservationCoordinator};
pub use guard::{Acquisition, LeaseGuard};
pub use reconciler::Reconciler;
