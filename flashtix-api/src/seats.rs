use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use flashtix_core::CoreError;
use flashtix_shared::{Ticket, TicketStatus};
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;

use crate::{error::AppError, state::AppState};

#[derive(Debug, Serialize)]
pub struct SeatView {
    pub seat: String,
    pub status: TicketStatus,
    pub price: f64,
    pub reserved_until: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Ticket> for SeatView {
    // Holder identities stay private
    fn from(ticket: Ticket) -> Self {
        Self {
            seat: ticket.seat,
            status: ticket.status,
            price: ticket.price,
            reserved_until: ticket.reserved_until,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SeatMapResponse {
    pub event_id: String,
    pub available: usize,
    pub seats: Vec<SeatView>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{event_id}/seats", get(seat_map))
        .route("/{event_id}/stream", get(seat_stream))
}

async fn seat_map(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<SeatMapResponse>, AppError> {
    let tickets = state.tickets.list_event(&event_id).await.map_err(CoreError::from)?;
    if tickets.is_empty() {
        return Err(AppError::Core(CoreError::NotFound(format!("no seats for event {}", event_id))));
    }

    let available = tickets.iter().filter(|t| t.status == TicketStatus::Available).count();
    Ok(Json(SeatMapResponse {
        event_id,
        available,
        seats: tickets.into_iter().map(SeatView::from).collect(),
    }))
}

/// Live seat changes for one event as server-sent events.
async fn seat_stream(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.seat_events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event_id = event_id.clone();
        async move {
            match result {
                Ok(event) if event.event_id == event_id => {
                    let mut event = event;
                    event.holder = None;
                    Some(Event::default().event(event.name()).json_data(&event))
                }
                // Lagged subscribers just miss updates
                _ => None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
