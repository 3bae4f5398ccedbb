//! Delivery module - Buffer durevoli per-destinatario e presenza
//!
//! Colma il divario tra "il mittente vuole consegnare ora" e "il
//! destinatario non è raggiungibile": code FIFO per-destinatario con
//! finestra di ritenzione e un presence store a TTL breve. Ogni mutazione è
//! scopata a una singola chiave (un recipient id), quindi destinatari
//! diversi non si contendono mai nulla.

pub mod presence;
pub mod queue;

// Re-exports per facilitare l'import
pub use presence::{PresenceStatus, PresenceStore};
pub use queue::DeliveryQueue;

use crate::core::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Task periodico che fa rispettare le finestre di ritenzione: rimuove le
/// liste bufferizzate scadute e i record di presenza non più rinfrescati.
pub async fn run_expiry_sweeper(state: Arc<AppState>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consuma il primo tick immediato

    loop {
        ticker.tick().await;
        let evicted_messages = state.message_buffer.evict_expired();
        let evicted_notifications = state.notification_buffer.evict_expired();
        let evicted_presence = state.presence.evict_expired();

        if evicted_messages + evicted_notifications + evicted_presence > 0 {
            info!(
                evicted_messages,
                evicted_notifications, evicted_presence, "Expiry sweep completed"
            );
        } else {
            debug!("Expiry sweep found nothing to evict");
        }
    }
}
