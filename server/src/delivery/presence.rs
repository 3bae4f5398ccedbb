//! PresenceStore - Segnale di liveness per utente
//!
//! Record a TTL breve scritto ad ogni connect/heartbeat/disconnect del
//! trasporto e letto dal delivery path per decidere consegna diretta o
//! bufferizzata. L'assenza di un record equivale a "offline", mai a errore.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{info, instrument};

/// Vista pubblica dello stato di presenza.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceStatus {
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

struct PresenceRecord {
    is_online: bool,
    last_seen: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

pub struct PresenceStore {
    records: DashMap<String, PresenceRecord>,
    ttl: Duration,
}

impl PresenceStore {
    pub fn new(ttl: Duration) -> Self {
        PresenceStore {
            records: DashMap::new(),
            ttl,
        }
    }

    /// Scrive lo stato online/offline e rinfresca il TTL.
    #[instrument(skip(self), fields(user_id))]
    pub fn set_online(&self, user_id: &str, is_online: bool) {
        let now = Utc::now();
        self.records.insert(
            user_id.to_string(),
            PresenceRecord {
                is_online,
                last_seen: now,
                expires_at: now + self.ttl,
            },
        );
        info!(is_online, "Presence updated");
    }

    /// Rinfresca TTL e last_seen su attività del trasporto senza cambiare il
    /// flag. No-op se il record non esiste.
    pub fn touch(&self, user_id: &str) {
        if let Some(mut record) = self.records.get_mut(user_id) {
            let now = Utc::now();
            record.last_seen = now;
            record.expires_at = now + self.ttl;
        }
    }

    /// Stato di presenza, con default offline per record assenti o scaduti.
    pub fn get_status(&self, user_id: &str) -> PresenceStatus {
        match self.records.get(user_id) {
            Some(record) if record.expires_at > Utc::now() => PresenceStatus {
                is_online: record.is_online,
                last_seen: record.last_seen,
            },
            _ => PresenceStatus {
                is_online: false,
                last_seen: Utc::now(),
            },
        }
    }

    /// Rimuove i record scaduti. Ritorna quanti ne ha eliminati.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        before - self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_record_defaults_to_offline() {
        let store = PresenceStore::new(Duration::minutes(5));
        let status = store.get_status("nobody");
        assert!(!status.is_online);
    }

    #[test]
    fn set_online_then_offline_round_trips() {
        let store = PresenceStore::new(Duration::minutes(5));
        store.set_online("alice", true);
        assert!(store.get_status("alice").is_online);

        store.set_online("alice", false);
        assert!(!store.get_status("alice").is_online);
    }

    #[test]
    fn expired_record_reads_as_offline() {
        let store = PresenceStore::new(Duration::milliseconds(-1));
        store.set_online("alice", true);
        assert!(!store.get_status("alice").is_online);
        assert_eq!(store.evict_expired(), 1);
    }
}
