//! Pure account-metrics and order-ticket core for the CFD dashboard.
//! No I/O, no async: every function here is safe to call on each price tick.

pub mod error;
pub mod positions;
pub mod price;
pub mod risk;
pub mod session;
pub mod symbol;
pub mod ticket;
pub mod types;

pub use error::EngineError;
pub use positions::PositionSet;
pub use price::{FeedMessage, PriceStore};
pub use risk::{compute_metrics, floating_pnl, margin_status, AccountMetrics, MarginStatus, MarginThresholds};
pub use session::Session;
pub use symbol::normalize;
pub use ticket::{TicketForm, TicketPreview};
pub use types::*;
