//! Sync Manager - Replay dell'outbox guidato dalla connettività
//!
//! Decide QUANDO tentare la consegna e applica il budget di retry. Macchina a
//! stati per entry: Pending -> Sending -> {Confirmed | Pending(retry+1) |
//! Dropped}. Un solo sync pass alla volta: un pass richiesto mentre un altro
//! è in corso è un no-op, ci penserà il prossimo evento di connettività.

use crate::error::ClientError;
use crate::listeners::Registry;
use crate::outbox::{Outbox, OutboxEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use protocol::{ConversationTarget, MessageType};
use serde::Serialize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, instrument, warn};

/// Budget massimo di tentativi per entry: oltre, la entry viene scartata
/// invece di ritentare all'infinito. Limita la crescita del backlog verso un
/// peer permanentemente irraggiungibile, al costo di perdere il messaggio.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// Snapshot aggregato spinto ai listener dopo ogni transizione; serializzabile
/// così un bridge UI può inoltrarlo senza rimapparlo.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub pending_messages: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub sync_in_progress: bool,
}

/// Il canale di consegna verso il server. Il replay dell'outbox passa di qui;
/// in produzione è [`crate::api::RestDelivery`], nei test un fake.
#[async_trait]
pub trait OutboundDelivery: Send + Sync {
    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), ClientError>;
}

pub struct SyncManager {
    outbox: Arc<Outbox>,
    delivery: Arc<dyn OutboundDelivery>,
    is_online: AtomicBool,
    /// Guardia booleana: al più un sync pass in volo
    sync_in_progress: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    status_listeners: Registry<SyncStatus>,
}

impl SyncManager {
    pub fn new(outbox: Arc<Outbox>, delivery: Arc<dyn OutboundDelivery>) -> Self {
        let last_sync = outbox.last_sync_time();
        Self {
            outbox,
            delivery,
            is_online: AtomicBool::new(false),
            sync_in_progress: AtomicBool::new(false),
            last_sync: Mutex::new(last_sync),
            status_listeners: Registry::new(),
        }
    }

    /// Accoda un messaggio composto e, se siamo online, fa partire un pass in
    /// background. La composizione non aspetta mai la rete.
    #[instrument(skip(self, content, attachments))]
    pub fn queue_message(
        self: &Arc<Self>,
        target: ConversationTarget,
        content: String,
        message_type: MessageType,
        attachments: Vec<String>,
        reply_to: Option<String>,
    ) -> OutboxEntry {
        let entry = self
            .outbox
            .enqueue(target, content, message_type, attachments, reply_to);

        if self.is_online.load(Ordering::SeqCst) {
            self.spawn_sync_pass();
        } else {
            self.push_status();
        }
        entry
    }

    /// Transizione di connettività dal trasporto. Il passaggio
    /// irraggiungibile -> raggiungibile fa ripartire il replay.
    #[instrument(skip(self))]
    pub fn set_connectivity(self: &Arc<Self>, online: bool) {
        let was_online = self.is_online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            info!("Connectivity regained, starting sync pass");
            self.spawn_sync_pass();
        } else {
            self.push_status();
        }
    }

    /// Trigger manuale (pull-to-refresh e simili).
    pub fn trigger_sync(self: &Arc<Self>) {
        self.spawn_sync_pass();
    }

    /// L'app è tornata in foreground: occasione naturale per un replay.
    pub fn notify_foregrounded(self: &Arc<Self>) {
        debug!("App foregrounded");
        self.spawn_sync_pass();
    }

    fn spawn_sync_pass(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.sync_pending().await;
        });
    }

    /// Un sync pass: rigioca tutte le entry pendenti, in ordine FIFO.
    ///
    /// Nessun backoff tra i tentativi dentro un pass: gli eventi di
    /// connettività fanno da throttle naturale. Concurrency: il guard rende
    /// no-op un pass richiesto mentre un altro è in volo.
    #[instrument(skip(self))]
    pub async fn sync_pending(&self) {
        if self
            .sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync pass already in flight, skipping");
            return;
        }
        self.push_status();

        let pending = self.outbox.list_pending();
        info!(count = pending.len(), "Sync pass started");

        for entry in pending {
            // Pending -> Sending
            match self.delivery.deliver(&entry).await {
                Ok(()) => {
                    // Sending -> Confirmed: la entry ha finito la sua vita
                    self.outbox.remove(&entry.message_id);
                    debug!(message_id = %entry.message_id, "Entry confirmed");
                }
                Err(e) if e.is_transient() => {
                    // Sending -> Pending (retry++) oppure Dropped a budget esaurito
                    let attempts = self.outbox.increment_retry(&entry.message_id);
                    if attempts >= MAX_SEND_ATTEMPTS {
                        warn!(
                            message_id = %entry.message_id,
                            attempts, "Retry budget exhausted, dropping entry"
                        );
                        self.outbox.remove(&entry.message_id);
                    } else {
                        debug!(message_id = %entry.message_id, attempts, "Transient failure, will retry");
                    }
                }
                Err(e) => {
                    // rifiuto terminale: ritentare non può riuscire
                    warn!(
                        message_id = %entry.message_id,
                        "Entry rejected terminally, dropping: {e}"
                    );
                    self.outbox.remove(&entry.message_id);
                }
            }
            self.push_status();
        }

        let now = Utc::now();
        *self.last_sync.lock().expect("last_sync poisoned") = Some(now);
        self.outbox.set_last_sync_time(now);

        self.sync_in_progress.store(false, Ordering::SeqCst);
        self.push_status();
        info!("Sync pass finished");
    }

    /// Snapshot corrente dello stato di sincronizzazione.
    pub fn get_sync_status(&self) -> SyncStatus {
        SyncStatus {
            pending_messages: self.outbox.pending_count(),
            last_sync_time: *self.last_sync.lock().expect("last_sync poisoned"),
            is_online: self.is_online.load(Ordering::SeqCst),
            sync_in_progress: self.sync_in_progress.load(Ordering::SeqCst),
        }
    }

    /// Registra un osservatore dello stato; riceve subito lo snapshot
    /// corrente e poi uno ad ogni transizione.
    pub fn on_status_change(&self, callback: impl Fn(&SyncStatus) + Send + Sync + 'static) -> u64 {
        callback(&self.get_sync_status());
        self.status_listeners.add(callback)
    }

    pub fn off_status_change(&self, id: u64) {
        self.status_listeners.remove(id);
    }

    fn push_status(&self) {
        self.status_listeners.emit(&self.get_sync_status());
    }
}
