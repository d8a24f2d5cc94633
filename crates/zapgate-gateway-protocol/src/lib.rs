//! Protocol types for communication between zapgate and a messaging bridge.
//!
//! A bridge is the process that drives one WhatsApp Web session through
//! browser automation. zapgate spawns one bridge per registered client and
//! the two sides exchange newline-delimited JSON over the bridge's stdio:
//!
//! - **Commands** (zapgate → bridge): send a message, send media, disconnect
//! - **Events** (bridge → zapgate): pairing/auth progress, inbound messages,
//!   command acknowledgements, disconnection
//!
//! Use this crate to build a bridge in Rust; the reference bridge wraps the
//! browser-automation client and speaks the same protocol.
//!
//! # Example: minimal bridge loop
//!
//! ```ignore
//! use zapgate_gateway_protocol::{GatewayCommand, GatewayEvent};
//!
//! // Read commands from stdin
//! let line = read_line_from_stdin();
//! let command: GatewayCommand = serde_json::from_str(&line)?;
//!
//! // Send events to stdout
//! let event = GatewayEvent::Ready;
//! println!("{}", serde_json::to_string(&event)?);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Commands (zapgate → bridge)
// ============================================================================

/// Commands sent from zapgate to a bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Send a text message to a chat.
    SendMessage {
        request_id: String,
        chat_id: String,
        content: String,
    },

    /// Send media (image, video, audio, document) to a chat.
    ///
    /// The payload is always the normalized base64 form; zapgate resolves
    /// URLs and raw buffers before the command reaches the bridge.
    SendMedia {
        request_id: String,
        chat_id: String,
        media: MediaPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },

    /// Request graceful teardown of the session connection.
    Disconnect,
}

/// Media payload for the SendMedia command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded media bytes.
    pub data: String,
    /// MIME type (or file extension, for bridges that derive the type).
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

// ============================================================================
// Events (bridge → zapgate)
// ============================================================================

/// Events sent from a bridge to zapgate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// The session needs user authentication (pairing).
    AuthRequired { method: AuthMethod },

    /// The session authenticated successfully.
    Authenticated,

    /// The session is fully connected and can send/receive messages.
    Ready,

    /// Authentication failed; the session will not become ready.
    AuthFailure { message: String },

    /// Incoming message from the platform.
    MessageReceived(Box<MessageReceivedData>),

    /// Command completed successfully.
    CommandOk {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    /// Command failed.
    CommandError {
        request_id: String,
        code: String,
        message: String,
    },

    /// The session was disconnected (remote logout, bridge exit, or a
    /// `Disconnect` command completing).
    Disconnected { reason: String },

    /// Bridge-level error not tied to a specific command.
    Error {
        code: String,
        message: String,
        /// Whether the bridge will shut down because of this error.
        #[serde(default)]
        fatal: bool,
    },
}

/// Authentication method for sessions requiring user pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// QR code pairing (WhatsApp Web).
    QrCode {
        /// Rendered pairing code as a data-URL-encoded image
        /// (`data:image/png;base64,...`), ready to serve to callers.
        qr_data: String,
        /// Seconds until the code expires and a fresh one is emitted.
        expires_in: u32,
    },
}

/// Data for an incoming message event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceivedData {
    pub message_id: String,
    /// Chat the message arrived in (e.g. `5511999998888@c.us`).
    pub chat_id: String,
    pub sender: Sender,
    pub content: MessageContent,
    /// Timestamp when the message was sent (from the platform).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Sender information for incoming messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Content of an incoming message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text message.
    Text { text: String },

    /// Media message; the caption is the only part zapgate inspects.
    Media {
        media_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },

    /// Unknown/unsupported content type.
    Unknown,
}

impl MessageContent {
    /// Extract the text body, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text { text } => Some(text),
            MessageContent::Media { caption, .. } => caption.as_deref(),
            MessageContent::Unknown => None,
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Well-known error codes for CommandError and Error events.
pub mod error_codes {
    /// Chat/conversation not found.
    pub const CHAT_NOT_FOUND: &str = "chat_not_found";
    /// Session is not connected/authenticated yet.
    pub const NOT_CONNECTED: &str = "not_connected";
    /// Rate limited by the platform.
    pub const RATE_LIMITED: &str = "rate_limited";
    /// Platform-side error.
    pub const PLATFORM_ERROR: &str = "platform_error";
}
