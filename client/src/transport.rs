//! Transport Channel - Canale WebSocket con riconnessione automatica
//!
//! Mantiene una connessione viva e multiplexata per sessione autenticata.
//! Il canale possiede l'insieme autoritativo delle conversazioni joinate e
//! le ristabilisce da solo all'inizio di ogni sessione: il chiamante non
//! deve mai ri-sottoscrivere a mano dopo una riconnessione.

use crate::error::ClientError;
use crate::listeners::Registry;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use protocol::{
    ClientEvent, ConversationUpdateDTO, MessageDTO, PresenceDTO, ReadReceiptDTO, TypingDTO,
    WsEvent,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::time::{Duration, interval, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Intervallo degli heartbeat, ben dentro il timeout di inattività del server
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub token: String,
    pub user_id: String,
    pub max_reconnect_attempts: u32,
    /// Ritardo fisso tra i tentativi di riconnessione
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            user_id: user_id.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Un registro indipendente per ogni tipo di evento.
struct EventListeners {
    message: Registry<MessageDTO>,
    read_receipt: Registry<ReadReceiptDTO>,
    typing_started: Registry<TypingDTO>,
    typing_stopped: Registry<TypingDTO>,
    conversation_updated: Registry<ConversationUpdateDTO>,
    presence: Registry<PresenceDTO>,
    state: Registry<ConnectionState>,
}

struct TransportInner {
    config: TransportConfig,
    state: Mutex<ConnectionState>,
    /// Insieme autoritativo delle conversazioni joinate, ripristinato ad
    /// ogni sessione
    joined: Mutex<BTreeSet<String>>,
    out_tx: Mutex<Option<tokio::sync::mpsc::UnboundedSender<ClientEvent>>>,
    listeners: EventListeners,
}

impl TransportInner {
    fn set_state(&self, new_state: ConnectionState) {
        *self.state.lock().expect("transport state poisoned") = new_state;
        self.listeners.state.emit(&new_state);
    }

    /// Smistamento esaustivo degli eventi server verso i registri dedicati.
    fn dispatch(&self, raw: &str) {
        let event = match serde_json::from_str::<WsEvent>(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Failed to deserialize server event: {e}");
                return;
            }
        };

        match event {
            WsEvent::NewMessage(dto) => self.listeners.message.emit(&dto),
            WsEvent::ReadReceipt(dto) => self.listeners.read_receipt.emit(&dto),
            WsEvent::TypingStarted(dto) => self.listeners.typing_started.emit(&dto),
            WsEvent::TypingStopped(dto) => self.listeners.typing_stopped.emit(&dto),
            WsEvent::ConversationUpdated(dto) => self.listeners.conversation_updated.emit(&dto),
            WsEvent::PresenceChanged(dto) => self.listeners.presence.emit(&dto),
            WsEvent::Error(dto) => {
                warn!(code = dto.code, "Server error event: {}", dto.message);
            }
        }
    }
}

#[derive(Clone)]
pub struct TransportChannel {
    inner: Arc<TransportInner>,
}

impl TransportChannel {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                config,
                state: Mutex::new(ConnectionState::Disconnected),
                joined: Mutex::new(BTreeSet::new()),
                out_tx: Mutex::new(None),
                listeners: EventListeners {
                    message: Registry::new(),
                    read_receipt: Registry::new(),
                    typing_started: Registry::new(),
                    typing_stopped: Registry::new(),
                    conversation_updated: Registry::new(),
                    presence: Registry::new(),
                    state: Registry::new(),
                },
            }),
        }
    }

    /// Stabilisce la connessione iniziale.
    ///
    /// Un fallimento qui (autenticazione rifiutata, timeout) viene restituito
    /// al chiamante invece di essere ritentato in silenzio: è il chiamante a
    /// decidere se chiedere una nuova autenticazione. La riconnessione
    /// automatica parte solo per le sessioni già stabilite che cadono.
    #[instrument(skip(self), fields(user_id = %self.inner.config.user_id))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        {
            let mut state = self.inner.state.lock().expect("transport state poisoned");
            if *state != ConnectionState::Disconnected {
                debug!("Connect called while already {:?}", *state);
                return Ok(());
            }
            *state = ConnectionState::Connecting;
        }
        self.inner.listeners.state.emit(&ConnectionState::Connecting);

        match open_socket(&self.inner.config).await {
            Ok(ws) => {
                let (out_tx, out_rx) = unbounded_channel::<ClientEvent>();
                *self.inner.out_tx.lock().expect("transport out_tx poisoned") = Some(out_tx);
                self.inner.set_state(ConnectionState::Connected);
                info!("Transport connected");
                tokio::spawn(run_session_loop(self.inner.clone(), ws, out_rx));
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().expect("transport state poisoned")
    }

    /// Chiude il canale: il loop di sessione termina e lo stato torna a
    /// Disconnected. L'insieme delle sottoscrizioni resta intatto e verrà
    /// ristabilito alla prossima `connect()`.
    pub fn close(&self) {
        self.inner
            .out_tx
            .lock()
            .expect("transport out_tx poisoned")
            .take();
    }

    /// Entra in una conversazione: la consegna di messaggi/typing/ricevute
    /// viene scopata alle conversazioni joinate. La sottoscrizione
    /// sopravvive alle riconnessioni.
    pub fn join(&self, conversation_id: &str) {
        self.inner
            .joined
            .lock()
            .expect("joined set poisoned")
            .insert(conversation_id.to_string());
        // best-effort se connessi ora; altrimenti verrà ristabilita da sola
        let _ = self.send(ClientEvent::Join {
            conversation_id: conversation_id.to_string(),
        });
    }

    pub fn leave(&self, conversation_id: &str) {
        self.inner
            .joined
            .lock()
            .expect("joined set poisoned")
            .remove(conversation_id);
        let _ = self.send(ClientEvent::Leave {
            conversation_id: conversation_id.to_string(),
        });
    }

    /// Conversazioni attualmente joinate (per ispezione e test).
    pub fn joined_conversations(&self) -> Vec<String> {
        self.inner
            .joined
            .lock()
            .expect("joined set poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Invia un evento al server sulla sessione corrente.
    pub fn send(&self, event: ClientEvent) -> Result<(), ClientError> {
        let guard = self.inner.out_tx.lock().expect("transport out_tx poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(event).map_err(|_| ClientError::NotConnected),
            None => Err(ClientError::NotConnected),
        }
    }

    // --- registri listener, uno per tipo di evento ---

    pub fn on_message(&self, f: impl Fn(&MessageDTO) + Send + Sync + 'static) -> u64 {
        self.inner.listeners.message.add(f)
    }

    pub fn off_message(&self, id: u64) {
        self.inner.listeners.message.remove(id);
    }

    pub fn on_read_receipt(&self, f: impl Fn(&ReadReceiptDTO) + Send + Sync + 'static) -> u64 {
        self.inner.listeners.read_receipt.add(f)
    }

    pub fn off_read_receipt(&self, id: u64) {
        self.inner.listeners.read_receipt.remove(id);
    }

    pub fn on_typing_started(&self, f: impl Fn(&TypingDTO) + Send + Sync + 'static) -> u64 {
        self.inner.listeners.typing_started.add(f)
    }

    pub fn off_typing_started(&self, id: u64) {
        self.inner.listeners.typing_started.remove(id);
    }

    pub fn on_typing_stopped(&self, f: impl Fn(&TypingDTO) + Send + Sync + 'static) -> u64 {
        self.inner.listeners.typing_stopped.add(f)
    }

    pub fn off_typing_stopped(&self, id: u64) {
        self.inner.listeners.typing_stopped.remove(id);
    }

    pub fn on_conversation_updated(
        &self,
        f: impl Fn(&ConversationUpdateDTO) + Send + Sync + 'static,
    ) -> u64 {
        self.inner.listeners.conversation_updated.add(f)
    }

    pub fn off_conversation_updated(&self, id: u64) {
        self.inner.listeners.conversation_updated.remove(id);
    }

    pub fn on_presence_changed(&self, f: impl Fn(&PresenceDTO) + Send + Sync + 'static) -> u64 {
        self.inner.listeners.presence.add(f)
    }

    pub fn off_presence_changed(&self, id: u64) {
        self.inner.listeners.presence.remove(id);
    }

    pub fn on_state_change(&self, f: impl Fn(&ConnectionState) + Send + Sync + 'static) -> u64 {
        self.inner.listeners.state.add(f)
    }

    pub fn off_state_change(&self, id: u64) {
        self.inner.listeners.state.remove(id);
    }
}

async fn open_socket(config: &TransportConfig) -> Result<WsStream, ClientError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", config.token))
        .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (stream, _response) = timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| ClientError::ConnectFailed("connection attempt timed out".to_string()))?
        .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;

    Ok(stream)
}

async fn send_frame(
    sink: &mut SplitSink<WsStream, WsMessage>,
    event: &ClientEvent,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(event).map_err(|e| {
        tokio_tungstenite::tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e,
        ))
    })?;
    sink.send(WsMessage::Text(json.into())).await
}

/// Loop di sessione: vive per tutta la durata logica del canale, attraverso
/// le riconnessioni. Ogni iterazione esterna è una sessione WebSocket.
async fn run_session_loop(
    inner: Arc<TransportInner>,
    mut ws: WsStream,
    mut out_rx: UnboundedReceiver<ClientEvent>,
) {
    'session: loop {
        let (mut sink, mut stream) = ws.split();

        // Ristabilisce tutte le sottoscrizioni attive: trasparente per il
        // chiamante, sia alla prima connessione che dopo un drop
        let joined: Vec<String> = inner
            .joined
            .lock()
            .expect("joined set poisoned")
            .iter()
            .cloned()
            .collect();
        for conversation_id in joined {
            debug!(conversation_id, "Restoring conversation subscription");
            if send_frame(&mut sink, &ClientEvent::Join { conversation_id }).await.is_err() {
                warn!("Failed to restore subscription, session is dead");
            }
        }

        let mut heartbeat = interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // consuma il primo tick immediato

        // true: la sessione è caduta, tentare la riconnessione
        // false: il canale è stato chiuso dal chiamante, terminare
        let reconnect = loop {
            tokio::select! {
                msg = stream.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => inner.dispatch(text.as_str()),
                        Some(Ok(WsMessage::Close(_))) => {
                            info!("Server closed the session");
                            break true;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("WebSocket error: {e}");
                            break true;
                        }
                        None => {
                            info!("WebSocket stream ended");
                            break true;
                        }
                    }
                }

                outgoing = out_rx.recv() => {
                    match outgoing {
                        Some(event) => {
                            if send_frame(&mut sink, &event).await.is_err() {
                                warn!("Failed to send event, session is dead");
                                break true;
                            }
                        }
                        None => {
                            info!("Outgoing channel closed, shutting down transport");
                            break false;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if send_frame(&mut sink, &ClientEvent::Heartbeat).await.is_err() {
                        warn!("Heartbeat failed, session is dead");
                        break true;
                    }
                }
            }
        };

        if !reconnect {
            break 'session;
        }

        // Riconnessione: tentativi limitati con ritardo fisso
        inner.set_state(ConnectionState::Connecting);
        let mut next_session = None;
        for attempt in 1..=inner.config.max_reconnect_attempts {
            sleep(inner.config.reconnect_delay).await;
            match open_socket(&inner.config).await {
                Ok(socket) => {
                    info!(attempt, "Reconnected");
                    next_session = Some(socket);
                    break;
                }
                Err(e) => {
                    warn!(attempt, "Reconnect attempt failed: {e}");
                }
            }
        }

        match next_session {
            Some(socket) => {
                ws = socket;
                inner.set_state(ConnectionState::Connected);
                continue 'session;
            }
            None => {
                warn!("Reconnect attempts exhausted, giving up");
                break 'session;
            }
        }
    }

    inner.out_tx.lock().expect("transport out_tx poisoned").take();
    inner.set_state(ConnectionState::Disconnected);
}
