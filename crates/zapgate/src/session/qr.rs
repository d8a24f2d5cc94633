//! Transient cache of pending pairing QR codes.
//!
//! An entry exists only between the bridge emitting a QR and the session
//! reaching a terminal pairing outcome (authenticated, ready, auth failure,
//! disconnect); a refreshed QR overwrites the previous one. Nothing here is
//! persisted - a restart loses in-flight pairing state and the caller
//! re-polls.

use std::sync::Arc;

use dashmap::DashMap;

/// Client id → latest rendered QR code (data-URL-encoded image).
#[derive(Clone, Default)]
pub struct QrCache {
    codes: Arc<DashMap<String, String>>,
}

impl QrCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the QR code for a client.
    pub fn insert(&self, client_id: &str, qr_code: String) {
        self.codes.insert(client_id.to_string(), qr_code);
    }

    /// Current QR code for a client, if one is pending.
    pub fn get(&self, client_id: &str) -> Option<String> {
        self.codes.get(client_id).map(|entry| entry.value().clone())
    }

    /// Drop the QR code for a client.
    pub fn remove(&self, client_id: &str) {
        self.codes.remove(client_id);
    }
}
