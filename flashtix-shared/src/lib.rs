pub mod models;

pub use models::events::{SeatEvent, SeatEventKind};
pub use models::ticket::{SeatKey, Ticket, TicketStatus};
