//! Domain module - Il write path autoritativo dei messaggi
//!
//! Sia l'handler WebSocket sia le route REST passano da qui, così le regole
//! su read-by, edit e delete sono applicate in un punto solo.

pub mod error;
pub mod message;

// Re-exports per facilitare l'import
pub use error::DeliveryError;
pub use message::{MarkReadOutcome, MessageService};
