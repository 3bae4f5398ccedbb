use dashmap::DashMap;
use protocol::WsEvent;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument, warn};

/// Segnali interni tra i task di una connessione e il resto del server.
pub enum InternalSignal {
    Shutdown,
    Join(String),
    Leave(String),
    Event(WsEvent),
}

pub struct SessionMap {
    sessions_online: DashMap<String, UnboundedSender<InternalSignal>>,
}

impl SessionMap {
    pub fn new() -> Self {
        SessionMap {
            sessions_online: DashMap::new(),
        }
    }

    #[instrument(skip(self, tx), fields(user_id))]
    pub fn register_online(&self, user_id: &str, tx: UnboundedSender<InternalSignal>) {
        info!("Registering user {} as online", user_id);
        // una seconda connessione dello stesso utente sovrascrive la prima:
        // il vecchio canale si chiude e il vecchio write task termina
        self.sessions_online.insert(user_id.to_string(), tx);
        info!("Total online sessions: {}", self.sessions_online.len());
    }

    /// Rimuove la sessione solo se `tx` è ancora quella registrata: il
    /// cleanup di una connessione sovrascritta non deve buttare giù la
    /// sessione più recente dello stesso utente.
    ///
    /// # Returns
    /// `true` se la sessione rimossa era quella corrente
    #[instrument(skip(self, tx), fields(user_id))]
    pub fn remove_if_current(
        &self,
        user_id: &str,
        tx: &UnboundedSender<InternalSignal>,
    ) -> bool {
        let removed = self
            .sessions_online
            .remove_if(user_id, |_, current| current.same_channel(tx))
            .is_some();
        if removed {
            info!("User session removed");
        } else {
            info!("A newer session is registered, leaving it in place");
        }
        removed
    }

    /// Invia un segnale alla sessione dell'utente se è online.
    ///
    /// # Returns
    /// `true` se il segnale è stato accettato dal canale della sessione
    #[instrument(skip(self, signal), fields(user_id))]
    pub fn send_if_online(&self, user_id: &str, signal: InternalSignal) -> bool {
        if let Some(entry) = self.sessions_online.get(user_id) {
            let tx = entry.value();
            if let Err(e) = tx.send(signal) {
                warn!("Failed to send signal to user session: {:?}", e);
                false
            } else {
                true
            }
        } else {
            info!("User {} not online, signal not sent", user_id);
            false
        }
    }

    /// Invia un evento a tutte le sessioni online (fan-out di presenza).
    #[instrument(skip(self, event))]
    pub fn broadcast(&self, event: &WsEvent) -> usize {
        let mut sent = 0;
        for entry in self.sessions_online.iter() {
            if entry
                .value()
                .send(InternalSignal::Event(event.clone()))
                .is_ok()
            {
                sent += 1;
            }
        }
        sent
    }

    /// Get the count of online sessions
    pub fn online_count(&self) -> usize {
        self.sessions_online.len()
    }

    /// Check if a specific user is online
    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.sessions_online.contains_key(user_id)
    }
}
