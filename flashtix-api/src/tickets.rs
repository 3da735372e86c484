use axum::{
    extract::State,
    routing::post,
    Extension, Json, Router,
};
use flashtix_reservation::Reservation;
use flashtix_shared::SeatKey;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, middleware::auth::CustomerClaims, state::AppState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SeatRequest {
    pub event_id: String,
    pub seat: String,
}

impl SeatRequest {
    fn key(&self) -> Result<SeatKey, AppError> {
        let event_id = self.event_id.trim();
        let seat = self.seat.trim();
        if event_id.is_empty() || seat.is_empty() {
            return Err(AppError::ValidationError("event_id and seat are required".to_string()));
        }
        // ':' separates the parts of the lease key
        if event_id.contains(':') {
            return Err(AppError::ValidationError("event_id must not contain ':'".to_string()));
        }
        Ok(SeatKey::new(event_id, seat))
    }
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub message: String,
    pub reservation: Reservation,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self { message: message.to_string() })
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Seat operations. Expects `customer_auth_middleware` to have run.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reserve", post(reserve_seat))
        .route("/confirm", post(confirm_purchase))
        .route("/release", post(release_seat))
        .route("/extend", post(extend_reservation))
}

// ============================================================================
// Handlers
// ============================================================================

async fn reserve_seat(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<SeatRequest>,
) -> Result<Json<ReservationResponse>, AppError> {
    let key = req.key()?;
    let reservation = state.coordinator.reserve(&key, &claims.sub).await?;

    Ok(Json(ReservationResponse {
        message: "Seat reserved successfully".to_string(),
        reservation,
    }))
}

async fn confirm_purchase(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<SeatRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let key = req.key()?;
    state.coordinator.confirm(&key, &claims.sub).await?;
    Ok(MessageResponse::new("Purchase confirmed"))
}

async fn release_seat(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<SeatRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    let key = req.key()?;
    state.coordinator.release(&key, Some(&claims.sub)).await?;
    Ok(MessageResponse::new("Seat released"))
}

async fn extend_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<CustomerClaims>,
    Json(req): Json<SeatRequest>,
) -> Result<Json<ReservationResponse>, AppError> {
    let key = req.key()?;
    let reservation = state.coordinator.extend(&key, &claims.sub).await?;

    Ok(Json(ReservationResponse {
        message: "Reservation extended".to_string(),
        reservation,
    }))
}
