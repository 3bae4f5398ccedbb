//! Registri di listener con isolamento dei fallimenti
//!
//! Ogni tipo di evento ha il proprio registro indipendente; un listener che
//! va in panico viene isolato e non impedisce la consegna agli altri.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

pub struct Registry<T> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<T>)>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Registry {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Registra un listener e ritorna l'id da usare per la deregistrazione.
    pub fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("listener registry poisoned")
            .push((id, Box::new(callback)));
        id
    }

    /// Deregistra un listener; no-op se l'id non esiste più.
    pub fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock().expect("listener registry poisoned");
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Consegna il valore a tutti i listener registrati, uno alla volta.
    /// Il panico di un listener viene catturato e loggato.
    pub fn emit(&self, value: &T) {
        let entries = self.entries.lock().expect("listener registry poisoned");
        for (id, callback) in entries.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                warn!(listener_id = id, "Listener panicked, isolating failure");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("listener registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
