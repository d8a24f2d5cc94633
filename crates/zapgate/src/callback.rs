//! Best-effort delivery of lifecycle and message events to callback URLs.
//!
//! Delivery is a single detached POST per event: failures are logged and
//! never retried, and nothing on this path can block or fail a session state
//! transition. A slow or dead callback endpoint must never stall the
//! lifecycle event loop.

use serde::Serialize;
use tracing::{debug, warn};

use crate::session::Registry;

/// Event types carried in the callback `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackEvent {
    Ready,
    Authenticated,
    AuthFailure,
    Message,
    Disconnected,
}

impl std::fmt::Display for CallbackEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallbackEvent::Ready => write!(f, "READY"),
            CallbackEvent::Authenticated => write!(f, "AUTHENTICATED"),
            CallbackEvent::AuthFailure => write!(f, "AUTH_FAILURE"),
            CallbackEvent::Message => write!(f, "MESSAGE"),
            CallbackEvent::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CallbackPayload {
    client_id: String,
    message: String,
    #[serde(rename = "type")]
    event: CallbackEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional_data: Option<serde_json::Value>,
}

/// Dispatches callback POSTs for registered clients.
#[derive(Clone)]
pub struct CallbackDispatcher {
    http: reqwest::Client,
    registry: Registry,
}

impl CallbackDispatcher {
    pub fn new(http: reqwest::Client, registry: Registry) -> Self {
        Self { http, registry }
    }

    /// Deliver an event to the client's registered callback URL.
    ///
    /// A client without a callback URL just logs a warning - callback
    /// registration is optional.
    pub async fn dispatch(
        &self,
        client_id: &str,
        message: String,
        event: CallbackEvent,
        additional_data: Option<serde_json::Value>,
    ) {
        let url = self.registry.callback_url(client_id).await;
        self.dispatch_to(url, client_id, message, event, additional_data);
    }

    /// Deliver an event to an explicit URL.
    ///
    /// Used on disconnect, where the registry entry is already gone by the
    /// time the DISCONNECTED event fires and the URL was captured up front.
    pub fn dispatch_to(
        &self,
        url: Option<String>,
        client_id: &str,
        message: String,
        event: CallbackEvent,
        additional_data: Option<serde_json::Value>,
    ) {
        let Some(url) = url else {
            warn!(
                client_id,
                event = %event,
                "Este número não está configurado para receber mensagens"
            );
            return;
        };

        let payload = CallbackPayload {
            client_id: client_id.to_string(),
            message,
            event,
            additional_data,
        };
        let http = self.http.clone();

        tokio::spawn(async move {
            match http.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        client_id = %payload.client_id,
                        event = %payload.event,
                        "Callback delivered"
                    );
                }
                Ok(response) => {
                    warn!(
                        client_id = %payload.client_id,
                        event = %payload.event,
                        status = %response.status(),
                        "Callback endpoint rejected event"
                    );
                }
                Err(e) => {
                    warn!(
                        client_id = %payload.client_id,
                        event = %payload.event,
                        error = %e,
                        "Failed to deliver callback"
                    );
                }
            }
        });
    }
}
