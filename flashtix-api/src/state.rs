use std::sync::Arc;
use tokio::sync::broadcast;
use flashtix_core::TicketStore;
use flashtix_reservation::ReservationCoordinator;
use flashtix_shared::SeatEvent;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
    pub tickets: Arc<dyn TicketStore>,
    pub seat_events: broadcast::Sender<SeatEvent>,
    pub auth: AuthConfig,
}
