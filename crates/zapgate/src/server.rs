//! Application state and router construction.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::handlers;
use crate::session::SessionManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}

/// Build the HTTP router.
///
/// Takes the config for the body-size limit and request timeout; the
/// timeout must exceed the QR wait bound or `/register` would be cut off
/// mid-poll.
pub fn build_app(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/register", get(handlers::register_client))
        .route("/clients", get(handlers::list_clients))
        .route("/getQRCode/{uuid}", get(handlers::get_qr_code))
        .route("/sendMessage", post(handlers::send_message))
        .route("/sendMedia", post(handlers::send_media))
        .route("/disconnect/{uuid}", delete(handlers::disconnect_client))
        .route("/addCallbackUrl", post(handlers::add_callback_url))
        .layer(DefaultBodyLimit::max(config.request_size_limit))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_seconds,
        )))
        .with_state(state)
}
