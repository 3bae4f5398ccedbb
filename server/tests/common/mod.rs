use axum_test::TestServer;
use server::core::AppState;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Secret JWT usato da tutti i test
pub const TEST_JWT_SECRET: &str = "unsegretodatestchenonvausatoinproduzione";

/// Crea un AppState per i test
///
/// # Arguments
/// * `pool` - Connection pool SQLite (fornito da #[sqlx::test])
///
/// # Returns
/// Arc<AppState> configurato con il JWT secret di test
pub fn create_test_state(pool: SqlitePool) -> Arc<AppState> {
    Arc::new(AppState::new(pool, TEST_JWT_SECRET.to_string()))
}

/// Crea un TestServer per i test
///
/// # Arguments
/// * `state` - AppState da utilizzare per il server
///
/// # Returns
/// TestServer configurato e pronto per eseguire richieste
pub fn create_test_server(state: Arc<AppState>) -> TestServer {
    let app = server::create_router(state);
    TestServer::new(app).expect("Failed to create test server")
}

/// Genera un JWT token per testing
///
/// # Arguments
/// * `user_id` - ID dell'utente per cui generare il token
///
/// # Returns
/// Token JWT valido per 24 ore
pub fn create_test_jwt(user_id: &str) -> String {
    server::auth::encode_jwt(user_id, TEST_JWT_SECRET).expect("Failed to create JWT token")
}
