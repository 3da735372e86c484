use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Natural key of a seat: one ticket row exists per `(event_id, seat)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeatKey {
    pub event_id: String,
    pub seat: String,
}

impl SeatKey {
    pub fn new(event_id: impl Into<String>, seat: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            seat: seat.into(),
        }
    }

    /// Key of the cluster-wide lease guarding this seat.
    pub fn lease_key(&self) -> String {
        format!("seat_lock:{}:{}", self.event_id, self.seat)
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_id, self.seat)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Available,
    Reserved,
    Sold,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Available => "AVAILABLE",
            TicketStatus::Reserved => "RESERVED",
            TicketStatus::Sold => "SOLD",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(TicketStatus::Available),
            "RESERVED" => Ok(TicketStatus::Reserved),
            "SOLD" => Ok(TicketStatus::Sold),
            other => Err(format!("unknown ticket status: {}", other)),
        }
    }
}

/// Lifecycle record of a single seat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub event_id: String,
    pub seat: String,
    pub status: TicketStatus,
    pub holder: Option<String>,
    pub reserved_until: Option<DateTime<Utc>>,
    pub price: f64,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// A freshly provisioned, unclaimed seat.
    pub fn available(key: &SeatKey, price: f64) -> Self {
        Self {
            event_id: key.event_id.clone(),
            seat: key.seat.clone(),
            status: TicketStatus::Available,
            holder: None,
            reserved_until: None,
            price,
            updated_at: Utc::now(),
        }
    }

    pub fn key(&self) -> SeatKey {
        SeatKey::new(self.event_id.clone(), self.seat.clone())
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.status == TicketStatus::Reserved && self.holder.as_deref() == Some(holder)
    }

    /// Checks the field combinations a single row can get wrong on its own.
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            TicketStatus::Available if self.holder.is_some() || self.reserved_until.is_some() => {
                Err(format!("{} is AVAILABLE but still carries a holder or expiry", self.key()))
            }
            TicketStatus::Reserved if self.holder.is_none() || self.reserved_until.is_none() => {
                Err(format!("{} is RESERVED without a holder or expiry", self.key()))
            }
            TicketStatus::Sold if self.reserved_until.is_some() => {
                Err(format!("{} is SOLD but still carries a reservation expiry", self.key()))
            }
            _ => Ok(()),
        }
    }
}
