//! Offline Outbox - Coda locale dei messaggi non confermati
//!
//! Nessun messaggio composto va perso per un guasto transitorio di rete: la
//! entry resta qui finché il server non conferma la persistenza o il budget
//! di retry si esaurisce. La scrittura è solo locale e non fallisce mai verso
//! il chiamante: se il database non è disponibile il contenuto resta in
//! memoria come ultima risorsa.

use crate::listeners::Registry;
use chrono::{DateTime, Utc};
use protocol::{ConversationTarget, CreateMessageDTO, MessageType};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Prefisso riservato degli id generati localmente: permette alla UI di
/// rendere lo stato "sending" senza interrogare il server.
pub const OUTBOX_ID_PREFIX: &str = "outbox-";

/// Un messaggio in attesa di conferma.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Id del messaggio, generato qui: è la chiave di idempotenza
    pub message_id: String,
    pub target: ConversationTarget,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<String>,
    pub reply_to: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// Monotono non decrescente
    pub retry_count: u32,
}

impl OutboxEntry {
    /// Payload per il write path REST del server.
    pub fn to_create_dto(&self) -> CreateMessageDTO {
        let (recipient_id, group_id) = match &self.target {
            ConversationTarget::Direct { recipient_id } => (Some(recipient_id.clone()), None),
            ConversationTarget::Group { group_id } => (None, Some(group_id.clone())),
        };
        CreateMessageDTO {
            message_id: self.message_id.clone(),
            recipient_id,
            group_id,
            content: self.content.clone(),
            message_type: self.message_type.clone(),
            attachments: self.attachments.clone(),
            reply_to: self.reply_to.clone(),
        }
    }
}

pub struct Outbox {
    conn: Mutex<Connection>,
    /// Ultima risorsa quando la scrittura su disco fallisce
    mem_fallback: Mutex<Vec<OutboxEntry>>,
    /// Notificati ad ogni variazione della dimensione della coda
    subscribers: Registry<usize>,
}

impl Outbox {
    /// Apre (o crea) il database dell'outbox.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            mem_fallback: Mutex::new(Vec::new()),
            subscribers: Registry::new(),
        })
    }

    /// Outbox in memoria, per i test.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            mem_fallback: Mutex::new(Vec::new()),
            subscribers: Registry::new(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS outbox (
                message_id   TEXT PRIMARY KEY,
                target_kind  TEXT NOT NULL,
                target_id    TEXT NOT NULL,
                content      TEXT NOT NULL,
                message_type TEXT NOT NULL,
                attachments  TEXT NOT NULL DEFAULT '[]',
                reply_to     TEXT,
                enqueued_at  TEXT NOT NULL,
                retry_count  INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS sync_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
    }

    /// Accoda un messaggio composto. Riesce sempre: un errore di persistenza
    /// viene loggato come warning e la entry resta in memoria.
    #[instrument(skip(self, content, attachments))]
    pub fn enqueue(
        &self,
        target: ConversationTarget,
        content: String,
        message_type: MessageType,
        attachments: Vec<String>,
        reply_to: Option<String>,
    ) -> OutboxEntry {
        let entry = OutboxEntry {
            message_id: format!("{OUTBOX_ID_PREFIX}{}", Uuid::new_v4()),
            target,
            content,
            message_type,
            attachments,
            reply_to,
            enqueued_at: Utc::now(),
            retry_count: 0,
        };

        if let Err(e) = self.persist(&entry) {
            warn!("Outbox persistence failed, holding entry in memory: {e}");
            self.mem_fallback
                .lock()
                .expect("outbox fallback poisoned")
                .push(entry.clone());
        }

        info!(message_id = %entry.message_id, "Message enqueued");
        self.notify_size_change();
        entry
    }

    fn persist(&self, entry: &OutboxEntry) -> Result<(), rusqlite::Error> {
        let (target_kind, target_id) = match &entry.target {
            ConversationTarget::Direct { recipient_id } => ("direct", recipient_id.as_str()),
            ConversationTarget::Group { group_id } => ("group", group_id.as_str()),
        };
        let attachments = serde_json::to_string(&entry.attachments).unwrap_or_else(|_| "[]".into());

        self.conn.lock().expect("outbox connection poisoned").execute(
            "INSERT INTO outbox (message_id, target_kind, target_id, content, message_type,
                                 attachments, reply_to, enqueued_at, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
            params![
                entry.message_id,
                target_kind,
                target_id,
                entry.content,
                entry.message_type.as_str(),
                attachments,
                entry.reply_to,
                entry.enqueued_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Entry in attesa, in ordine FIFO di accodamento. Le eventuali entry
    /// trattenute in memoria seguono quelle persistite.
    pub fn list_pending(&self) -> Vec<OutboxEntry> {
        let mut entries = self.list_persisted().unwrap_or_else(|e| {
            warn!("Failed to read outbox rows: {e}");
            Vec::new()
        });
        entries.extend(
            self.mem_fallback
                .lock()
                .expect("outbox fallback poisoned")
                .iter()
                .cloned(),
        );
        entries
    }

    fn list_persisted(&self) -> Result<Vec<OutboxEntry>, rusqlite::Error> {
        let conn = self.conn.lock().expect("outbox connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT message_id, target_kind, target_id, content, message_type,
                    attachments, reply_to, enqueued_at, retry_count
             FROM outbox
             ORDER BY enqueued_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map([], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Rimuove una entry (conferma o budget esaurito). Idempotente: no-op se
    /// già rimossa.
    #[instrument(skip(self))]
    pub fn remove(&self, entry_id: &str) {
        let removed_db = match self
            .conn
            .lock()
            .expect("outbox connection poisoned")
            .execute("DELETE FROM outbox WHERE message_id = ?1", params![entry_id])
        {
            Ok(n) => n > 0,
            Err(e) => {
                warn!("Failed to delete outbox row: {e}");
                false
            }
        };

        let mut fallback = self.mem_fallback.lock().expect("outbox fallback poisoned");
        let before = fallback.len();
        fallback.retain(|entry| entry.message_id != entry_id);
        let removed_mem = fallback.len() != before;
        drop(fallback);

        if removed_db || removed_mem {
            self.notify_size_change();
        }
    }

    /// Incrementa il contatore di retry e ritorna il nuovo valore.
    pub fn increment_retry(&self, entry_id: &str) -> u32 {
        let conn = self.conn.lock().expect("outbox connection poisoned");
        let updated = conn
            .execute(
                "UPDATE outbox SET retry_count = retry_count + 1 WHERE message_id = ?1",
                params![entry_id],
            )
            .unwrap_or(0);
        if updated > 0 {
            return conn
                .query_row(
                    "SELECT retry_count FROM outbox WHERE message_id = ?1",
                    params![entry_id],
                    |row| row.get(0),
                )
                .unwrap_or(0);
        }
        drop(conn);

        let mut fallback = self.mem_fallback.lock().expect("outbox fallback poisoned");
        for entry in fallback.iter_mut() {
            if entry.message_id == entry_id {
                entry.retry_count += 1;
                return entry.retry_count;
            }
        }
        0
    }

    /// Numero di entry in attesa.
    pub fn pending_count(&self) -> usize {
        let persisted: i64 = self
            .conn
            .lock()
            .expect("outbox connection poisoned")
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))
            .unwrap_or(0);
        persisted as usize + self.mem_fallback.lock().expect("outbox fallback poisoned").len()
    }

    /// Vero per gli id generati localmente e non ancora confermati: la UI li
    /// rende come "sending".
    pub fn is_outbox_message(&self, id: &str) -> bool {
        if !id.starts_with(OUTBOX_ID_PREFIX) {
            return false;
        }
        let in_db: bool = self
            .conn
            .lock()
            .expect("outbox connection poisoned")
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM outbox WHERE message_id = ?1)",
                params![id],
                |row| row.get(0),
            )
            .unwrap_or(false);
        in_db
            || self
                .mem_fallback
                .lock()
                .expect("outbox fallback poisoned")
                .iter()
                .any(|entry| entry.message_id == id)
    }

    /// Timestamp dell'ultima sincronizzazione riuscita, persistito.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .expect("outbox connection poisoned")
            .query_row(
                "SELECT value FROM sync_state WHERE key = 'last_sync'",
                [],
                |row| row.get(0),
            )
            .ok();
        raw.and_then(|value| {
            DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
    }

    pub fn set_last_sync_time(&self, at: DateTime<Utc>) {
        if let Err(e) = self.conn.lock().expect("outbox connection poisoned").execute(
            "INSERT INTO sync_state (key, value) VALUES ('last_sync', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![at.to_rfc3339()],
        ) {
            warn!("Failed to persist last sync time: {e}");
        }
    }

    /// Registra un subscriber per le variazioni di dimensione della coda.
    pub fn subscribe(&self, callback: impl Fn(&usize) + Send + Sync + 'static) -> u64 {
        self.subscribers.add(callback)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(id);
    }

    fn notify_size_change(&self) {
        let size = self.pending_count();
        self.subscribers.emit(&size);
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxEntry> {
    let target_kind: String = row.get(1)?;
    let target_id: String = row.get(2)?;
    let target = if target_kind == "group" {
        ConversationTarget::Group { group_id: target_id }
    } else {
        ConversationTarget::Direct { recipient_id: target_id }
    };

    let message_type_raw: String = row.get(4)?;
    let message_type = MessageType::parse(&message_type_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown message type: {message_type_raw}").into(),
        )
    })?;

    let attachments_raw: String = row.get(5)?;
    let attachments: Vec<String> = serde_json::from_str(&attachments_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let enqueued_raw: String = row.get(7)?;
    let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(OutboxEntry {
        message_id: row.get(0)?,
        target,
        content: row.get(3)?,
        message_type,
        attachments,
        reply_to: row.get(6)?,
        enqueued_at,
        retry_count: row.get(8)?,
    })
}
