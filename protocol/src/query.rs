//! Query DTOs - Parametri query string per le API REST

use serde::{Deserialize, Serialize};

/// Paginazione per la lista messaggi di una conversazione diretta.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DirectMessagesQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
