//! DeliveryQueue - Coda durevole per-destinatario
//!
//! Lista FIFO append-only per ogni destinatario non raggiungibile sul
//! trasporto real-time. La scadenza è a livello di lista e viene rinfrescata
//! ad ogni append: una raffica di messaggi nuovi estende anche la ritenzione
//! di quelli già bufferizzati. Semplificazione voluta, vedi DESIGN.md.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::{debug, info, instrument, warn};

struct BufferedList<T> {
    entries: VecDeque<Buffered<T>>,
    expires_at: DateTime<Utc>,
}

struct Buffered<T> {
    payload: T,
    #[allow(dead_code)]
    buffered_at: DateTime<Utc>,
}

pub struct DeliveryQueue<T> {
    lists: DashMap<String, BufferedList<T>>,
    retention: Duration,
}

impl<T: Clone> DeliveryQueue<T> {
    pub fn new(retention: Duration) -> Self {
        DeliveryQueue {
            lists: DashMap::new(),
            retention,
        }
    }

    /// Accoda un payload per il destinatario e rinfresca la scadenza
    /// dell'intera lista.
    #[instrument(skip(self, payload), fields(recipient_id))]
    pub fn buffer_for_recipient(&self, recipient_id: &str, payload: T) {
        let now = Utc::now();
        let mut list = self
            .lists
            .entry(recipient_id.to_string())
            .or_insert_with(|| BufferedList {
                entries: VecDeque::new(),
                expires_at: now + self.retention,
            });

        // una lista trovata scaduta ma non ancora ripulita dallo sweep
        // riparte vuota
        if list.expires_at <= now {
            warn!("Buffer list had expired, restarting it empty");
            list.entries.clear();
        }

        list.entries.push_back(Buffered {
            payload,
            buffered_at: now,
        });
        list.expires_at = now + self.retention;
        info!(buffered = list.entries.len(), "Payload buffered for offline recipient");
    }

    /// Restituisce tutto il backlog del destinatario e svuota la lista in un
    /// unico passo. Chiamata una volta per riconnessione, non ad ogni
    /// heartbeat. Una lista scaduta drena vuota.
    #[instrument(skip(self), fields(recipient_id))]
    pub fn drain_for_recipient(&self, recipient_id: &str) -> Vec<T> {
        match self.lists.remove(recipient_id) {
            Some((_, list)) => {
                if list.expires_at <= Utc::now() {
                    debug!("Buffer list expired, draining empty");
                    return Vec::new();
                }
                info!(drained = list.entries.len(), "Backlog drained");
                list.entries.into_iter().map(|b| b.payload).collect()
            }
            None => Vec::new(),
        }
    }

    /// Numero di entry bufferizzate senza drenare, per i badge di non letti.
    pub fn recipient_count(&self, recipient_id: &str) -> usize {
        match self.lists.get(recipient_id) {
            Some(list) if list.expires_at > Utc::now() => list.entries.len(),
            _ => 0,
        }
    }

    /// Rimuove le liste scadute. Ritorna quante ne ha eliminate.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.lists.len();
        self.lists.retain(|_, list| list.expires_at > now);
        before - self.lists.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_fifo_order_and_clears() {
        let queue: DeliveryQueue<&str> = DeliveryQueue::new(Duration::days(7));
        queue.buffer_for_recipient("bob", "first");
        queue.buffer_for_recipient("bob", "second");

        assert_eq!(queue.recipient_count("bob"), 2);
        assert_eq!(queue.drain_for_recipient("bob"), vec!["first", "second"]);
        assert_eq!(queue.recipient_count("bob"), 0);
        assert!(queue.drain_for_recipient("bob").is_empty());
    }

    #[test]
    fn recipients_are_independent() {
        let queue: DeliveryQueue<u32> = DeliveryQueue::new(Duration::days(7));
        queue.buffer_for_recipient("bob", 1);
        queue.buffer_for_recipient("carol", 2);

        assert_eq!(queue.drain_for_recipient("bob"), vec![1]);
        assert_eq!(queue.recipient_count("carol"), 1);
    }

    #[test]
    fn expired_list_drains_empty() {
        let queue: DeliveryQueue<u32> = DeliveryQueue::new(Duration::milliseconds(-1));
        queue.buffer_for_recipient("bob", 1);
        assert!(queue.drain_for_recipient("bob").is_empty());
    }

    #[test]
    fn evict_expired_removes_only_stale_lists() {
        let stale: DeliveryQueue<u32> = DeliveryQueue::new(Duration::milliseconds(-1));
        stale.buffer_for_recipient("bob", 1);
        assert_eq!(stale.evict_expired(), 1);

        let fresh: DeliveryQueue<u32> = DeliveryQueue::new(Duration::days(7));
        fresh.buffer_for_recipient("bob", 1);
        assert_eq!(fresh.evict_expired(), 0);
        assert_eq!(fresh.recipient_count("bob"), 1);
    }
}
