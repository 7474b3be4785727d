use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::extractor::Extractor;
use crate::session::SessionRegistry;

// --- Modules ---
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod models;
pub mod progress;
pub mod service;
pub mod session;

/// Shared by every handler. Each test builds its own, so nothing here is global.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub extractor: Arc<Extractor>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let extractor = Extractor::from_config(&config);
        AppState {
            config: Arc::new(config),
            sessions: Arc::new(SessionRegistry::new()),
            extractor: Arc::new(extractor),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route("/api/formats", get(handlers::list_formats))
        .route("/api/download", get(handlers::download))
        .route("/api/download/progress", get(handlers::progress))
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .with_state(state)
}
