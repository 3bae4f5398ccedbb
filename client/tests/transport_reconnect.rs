//! Integration tests per il Transport Channel
//!
//! Test per:
//! - Ripristino automatico delle sottoscrizioni dopo una riconnessione,
//!   senza che il chiamante ri-emetta i join
//! - Fallimento della connessione iniziale restituito al chiamante
//!
//! Il "server" è un accept loop tokio-tungstenite locale che registra i
//! frame ricevuti per ogni sessione e può far cadere la connessione su
//! comando.

use client::{ClientError, ConnectionState, TransportChannel, TransportConfig};
use futures_util::StreamExt;
use protocol::ClientEvent;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Join ricevuti, una lista per ogni sessione accettata in ordine.
type SessionLog = Arc<Mutex<Vec<Vec<String>>>>;

/// Conversazione "magica": un TypingStart su questa fa cadere la sessione.
const KILL_SWITCH: &str = "kill-session";

async fn spawn_ws_server() -> (SocketAddr, SessionLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let log: SessionLog = Arc::new(Mutex::new(Vec::new()));

    let log_clone = log.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let session_index = {
                let mut sessions = log_clone.lock().unwrap();
                sessions.push(Vec::new());
                sessions.len() - 1
            };

            let log = log_clone.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let WsMessage::Text(text) = msg else { continue };
                    match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(ClientEvent::Join { conversation_id }) => {
                            log.lock().unwrap()[session_index].push(conversation_id);
                        }
                        Ok(ClientEvent::TypingStart { conversation_id })
                            if conversation_id == KILL_SWITCH =>
                        {
                            // drop brusco: il client deve accorgersene e
                            // riconnettersi da solo
                            return;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    (addr, log)
}

fn test_config(addr: SocketAddr) -> TransportConfig {
    let mut config = TransportConfig::new(format!("ws://{addr}"), "test-token", "alice");
    config.reconnect_delay = Duration::from_millis(50);
    config.max_reconnect_attempts = 5;
    config.connect_timeout = Duration::from_secs(2);
    config
}

async fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

// ============================================================
// Scenario C: riconnessione con ripristino delle sottoscrizioni
// ============================================================

#[tokio::test]
async fn test_reconnect_restores_all_subscriptions_without_caller_joins() {
    let (addr, log) = spawn_ws_server().await;
    let transport = TransportChannel::new(test_config(addr));

    transport.connect().await.expect("initial connect");
    assert_eq!(transport.state(), ConnectionState::Connected);

    transport.join("conv-1");
    transport.join("conv-2");

    // la prima sessione ha visto entrambi i join
    assert!(
        wait_until(Duration::from_secs(3), || {
            let sessions = log.lock().unwrap();
            sessions.first().map(|joins| joins.len() >= 2).unwrap_or(false)
        })
        .await,
        "first session never saw the joins"
    );

    // fai cadere la sessione lato server
    transport
        .send(ClientEvent::TypingStart {
            conversation_id: KILL_SWITCH.to_string(),
        })
        .expect("send kill switch");

    // il canale si riconnette e ristabilisce TUTTE le sottoscrizioni da solo
    assert!(
        wait_until(Duration::from_secs(5), || {
            let sessions = log.lock().unwrap();
            sessions.len() >= 2
                && sessions[1].contains(&"conv-1".to_string())
                && sessions[1].contains(&"conv-2".to_string())
        })
        .await,
        "second session did not receive the restored joins"
    );

    assert!(
        wait_until(Duration::from_secs(2), || {
            transport.state() == ConnectionState::Connected
        })
        .await
    );

    // l'insieme autoritativo non è cambiato nel frattempo
    assert_eq!(
        transport.joined_conversations(),
        vec!["conv-1".to_string(), "conv-2".to_string()]
    );
}

// ============================================================
// Connessione iniziale: il fallimento arriva al chiamante
// ============================================================

#[tokio::test]
async fn test_initial_connect_failure_is_surfaced_not_retried() {
    // porta appena liberata: connection refused immediato
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = TransportChannel::new(test_config(addr));
    let result = transport.connect().await;

    match result {
        Err(ClientError::ConnectFailed(_)) => {}
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

// ============================================================
// Leave: la sottoscrizione rimossa non viene ripristinata
// ============================================================

#[tokio::test]
async fn test_left_conversation_is_not_restored_after_reconnect() {
    let (addr, log) = spawn_ws_server().await;
    let transport = TransportChannel::new(test_config(addr));

    transport.connect().await.expect("initial connect");
    transport.join("conv-keep");
    transport.join("conv-drop");
    transport.leave("conv-drop");

    transport
        .send(ClientEvent::TypingStart {
            conversation_id: KILL_SWITCH.to_string(),
        })
        .expect("send kill switch");

    assert!(
        wait_until(Duration::from_secs(5), || {
            let sessions = log.lock().unwrap();
            sessions.len() >= 2 && sessions[1].contains(&"conv-keep".to_string())
        })
        .await,
        "second session did not receive the kept subscription"
    );

    let sessions = log.lock().unwrap();
    assert!(
        !sessions[1].contains(&"conv-drop".to_string()),
        "left conversation must not be restored"
    );
}
