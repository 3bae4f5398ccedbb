//! Server library - espone i moduli principali per i test

pub mod core;
pub mod delivery;
pub mod domain;
pub mod entities;
pub mod repositories;
pub mod services;
pub mod ws;

// Re-export dei tipi principali per facilitare l'import
// (path espliciti: `core` da solo sarebbe ambiguo col crate builtin)
pub use crate::core::{AppError, AppState, Config, auth};
pub use services::root;

use axum::{
    Router, middleware,
    routing::{any, get, patch, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Crea il router principale dell'applicazione
pub fn create_router(state: Arc<AppState>) -> Router {
    use crate::core::authentication_middleware;
    use ws::ws_handler;

    Router::new()
        .route("/", get(root))
        .nest("/messages", configure_message_routes(state.clone()))
        .nest("/conversations", configure_conversation_routes(state.clone()))
        .route(
            "/ws",
            any(ws_handler).layer(middleware::from_fn_with_state(
                state.clone(),
                authentication_middleware,
            )),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Configura le routes di scrittura e lettura dei messaggi
fn configure_message_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    use crate::core::authentication_middleware;
    use services::*;

    Router::new()
        .route("/", post(create_message))
        .route("/unread/count", get(get_unread_count))
        .route("/{message_id}", patch(edit_message).delete(delete_message))
        .route("/{message_id}/read", post(mark_message_read))
        .layer(middleware::from_fn_with_state(
            state,
            authentication_middleware,
        ))
}

/// Configura le routes di lettura delle conversazioni dirette
fn configure_conversation_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    use crate::core::authentication_middleware;
    use services::*;

    Router::new()
        .route("/{user_id}/messages", get(list_direct_messages))
        .layer(middleware::from_fn_with_state(
            state,
            authentication_middleware,
        ))
}
