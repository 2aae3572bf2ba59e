use std::{net::SocketAddr, sync::Arc};

use copuchat::{AppState, config::Config, store::MemoryStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "copuchat=info".into()),
        )
        .init();

    let config = Config::from_env();
    let store = Arc::new(MemoryStore::new(config.message_log_cap));
    let state = AppState::new(store, &config);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap();
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(
        listener,
        copuchat::app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
