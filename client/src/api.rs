//! RestDelivery - Write path REST verso il server
//!
//! Il replay dell'outbox consegna da qui: un POST idempotente sul write path
//! del server (stessa chiave generata dal client, quindi un replay doppio
//! collassa sulla stessa riga).

use crate::error::ClientError;
use crate::outbox::OutboxEntry;
use crate::sync::OutboundDelivery;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RestDelivery {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestDelivery {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl OutboundDelivery for RestDelivery {
    #[instrument(skip(self, entry), fields(message_id = %entry.message_id))]
    async fn deliver(&self, entry: &OutboxEntry) -> Result<(), ClientError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&entry.to_create_dto())
            .send()
            .await
            .map_err(|e| {
                // rete o timeout: ritentabile
                warn!("Delivery request failed: {e}");
                ClientError::Transient(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("Delivery confirmed by server");
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            // il server c'è ma non risponde bene: ritentabile
            Err(ClientError::Transient(format!("{status}: {detail}")))
        } else {
            // 4xx: la richiesta non può riuscire, inutile bruciare retry
            Err(ClientError::Rejected {
                status: status.as_u16(),
                detail,
            })
        }
    }
}
