use crate::ws::BROADCAST_CHANNEL_CAPACITY;
use dashmap::DashMap;
use protocol::WsEvent;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::SendError;
use tokio::sync::broadcast::{Receiver, Sender};
use tracing::{info, instrument, warn};

/// Canali broadcast per-conversazione: la sottoscrizione scopa la consegna
/// di messaggi, typing e ricevute alle sole sessioni che hanno fatto join.
pub struct ConversationMap {
    channels: DashMap<String, Sender<Arc<WsEvent>>>,
}

impl ConversationMap {
    pub fn new() -> Self {
        ConversationMap {
            channels: DashMap::new(),
        }
    }

    #[instrument(skip(self), fields(conversation_id))]
    pub fn subscribe(&self, conversation_id: &str) -> Receiver<Arc<WsEvent>> {
        match self.channels.get(conversation_id) {
            // sottoscrizione su un canale non ancora esistente
            None => {
                info!("Creating new broadcast channel for conversation");
                // Arc<WsEvent> per condividere il riferimento, non l'evento:
                // evita copie inutili su ogni receiver
                let (tx, rx) = broadcast::channel::<Arc<WsEvent>>(BROADCAST_CHANNEL_CAPACITY);
                self.channels.insert(conversation_id.to_string(), tx);
                rx
            }
            // sottoscrivere un canale esistente == ottenere una nuova testa rx
            Some(c) => {
                info!("Subscribing to existing broadcast channel");
                c.value().subscribe()
            }
        }
    }

    #[instrument(skip(self, event), fields(conversation_id))]
    pub fn publish(
        &self,
        conversation_id: &str,
        event: Arc<WsEvent>,
    ) -> Result<usize, SendError<Arc<WsEvent>>> {
        if let Some(channel) = self.channels.get(conversation_id) {
            match channel.send(event.clone()) {
                Ok(n) => {
                    info!(receivers = n, "Event broadcast to receivers");
                    Ok(n)
                }
                Err(e) => {
                    warn!("No active receivers, removing channel");
                    // nessuno in ascolto, rimuovi il canale
                    drop(channel); // rilascia il lock
                    self.channels.remove(conversation_id);
                    Err(e)
                }
            }
        } else {
            warn!("Attempted to publish to non-existent conversation channel");
            Err(SendError(event))
        }
    }
}
