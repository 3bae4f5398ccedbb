use server::{AppState, Config, create_router, delivery};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    config.print_info();

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let state = Arc::new(AppState::with_retention(
        pool,
        config.jwt_secret.clone(),
        chrono::Duration::days(config.message_retention_days),
        chrono::Duration::days(config.notification_retention_days),
        chrono::Duration::seconds(config.presence_ttl_secs),
    ));

    // Task periodico che fa rispettare le finestre di ritenzione
    tokio::spawn(delivery::run_expiry_sweeper(
        state.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    ));

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    info!("Server listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
