//! HTTP request handlers.

mod clients;
mod messages;

pub use clients::{
    add_callback_url, disconnect_client, get_qr_code, list_clients, register_client,
};
pub use messages::{send_media, send_message};

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}
