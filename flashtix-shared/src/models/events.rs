use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ticket::SeatKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SeatEventKind {
    Reserved,
    Extended,
    Sold,
    Released,
}

/// Seat-map change pushed to live subscribers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SeatEvent {
    pub kind: SeatEventKind,
    pub event_id: String,
    pub seat: String,
    pub holder: Option<String>,
    pub reserved_until: Option<DateTime<Utc>>,
    pub timestamp: i64,
}

impl SeatEvent {
    pub fn new(kind: SeatEventKind, key: &SeatKey, holder: Option<&str>) -> Self {
        Self {
            kind,
            event_id: key.event_id.clone(),
            seat: key.seat.clone(),
            holder: holder.map(str::to_string),
            reserved_until: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn with_expiry(mut self, until: DateTime<Utc>) -> Self {
        self.reserved_until = Some(until);
        self
    }

    /// SSE event name, e.g. `seat_reserved`.
    pub fn name(&self) -> &'static str {
        match self.kind {
            SeatEventKind::Reserved => "seat_reserved",
            SeatEventKind::Extended => "seat_extended",
            SeatEventKind::Sold => "seat_sold",
            SeatEventKind::Released => "seat_released",
        }
    }
}
