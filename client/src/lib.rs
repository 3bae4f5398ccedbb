//! Client library - Sincronizzazione messaggi lato client
//!
//! I componenti sono istanze esplicite, cablate dalla composition root
//! dell'applicazione (niente stato condiviso a livello di modulo):
//!
//! - [`outbox::Outbox`]: coda locale persistita dei messaggi non ancora
//!   confermati dal server
//! - [`sync::SyncManager`]: decide quando tentare la consegna e applica il
//!   budget di retry
//! - [`transport::TransportChannel`]: canale WebSocket con riconnessione
//!   automatica e ripristino delle sottoscrizioni
//! - [`api::RestDelivery`]: write path REST usato dal replay dell'outbox
//!
//! Cablaggio tipico: il listener di stato del trasporto alimenta
//! `SyncManager::set_connectivity`, così ogni transizione
//! irraggiungibile -> raggiungibile fa ripartire il replay.

pub mod api;
pub mod error;
pub mod listeners;
pub mod outbox;
pub mod sync;
pub mod transport;

// Re-exports per facilitare l'import
pub use api::RestDelivery;
pub use error::ClientError;
pub use outbox::{Outbox, OutboxEntry};
pub use sync::{OutboundDelivery, SyncManager, SyncStatus};
pub use transport::{ConnectionState, TransportChannel, TransportConfig};
