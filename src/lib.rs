pub mod config;
pub mod error;
pub mod preview;
pub mod rooms;
pub mod store;

use std::sync::Arc;

use axum::{Router, extract::FromRef};
use tower_http::cors::CorsLayer;

use config::Config;
use preview::PreviewService;
use rooms::{hub::HubRegistry, namespace::Namespace, presence::Presence, ranking::Ranking};
use store::SharedStore;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub namespace: Namespace,
    pub presence: Presence,
    pub ranking: Ranking,
    pub hubs: Arc<HubRegistry>,
    pub previews: PreviewService,
}

impl AppState {
    pub fn new(store: SharedStore, config: &Config) -> Self {
        let presence = Presence::new(store.clone(), config.presence_timeout);
        Self {
            namespace: Namespace::new(store.clone(), config.message_log_cap),
            ranking: Ranking::new(store.clone(), presence.clone()),
            presence,
            hubs: Arc::new(HubRegistry::new()),
            previews: PreviewService::new(store, config.preview_ttl, config.preview_max_fetches),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(rooms::router())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
