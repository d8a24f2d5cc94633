//! Shared API types used by the HTTP handlers and integration tests.
//!
//! These types define the wire contract of the management API. Field names
//! are camelCase to match what existing callers send and expect.

use serde::{Deserialize, Serialize};

/// Domain suffix appended to a phone number to form the platform chat id.
pub const CHAT_ID_SUFFIX: &str = "@c.us";

/// Build the platform chat id for a phone number.
pub fn chat_id(numero: &str) -> String {
    format!("{}{}", numero, CHAT_ID_SUFFIX)
}

// ============================================================================
// Response Types
// ============================================================================

/// A registered client and its pending QR code, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

/// Response for a successful registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub client_id: String,
    pub qr_code: String,
}

/// Response for a QR code lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeResponse {
    pub success: bool,
    pub qr_code: String,
}

/// Generic `{success, message}` body for both success and failure responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub success: bool,
    pub message: String,
}

impl StatusBody {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Bare `{error}` body used by field-validation and not-found responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// `{success: false, error}` body used by addCallbackUrl validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamErrorBody {
    pub success: bool,
    pub error: String,
}

impl ParamErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// Body for POST /sendMessage.
///
/// Fields are optional so missing values produce the documented 400 body
/// instead of a deserialization rejection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub numero: Option<String>,
    #[serde(default)]
    pub mensagem: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Body for POST /sendMedia.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaRequest {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub numero: Option<String>,
    /// Base64 payload; interpreted according to `media_type`.
    #[serde(default)]
    pub media_data: Option<String>,
    /// `"base64"` or `"byteArray"`.
    #[serde(default)]
    pub media_type: Option<String>,
    /// Remote URL to fetch the media from.
    #[serde(default)]
    pub media_url: Option<String>,
    /// MIME type (or file extension) of the media.
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Body for POST /addCallbackUrl.
///
/// Values are kept as raw JSON so non-string types can be rejected with the
/// documented 400 body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCallbackRequest {
    #[serde(default)]
    pub client_id: Option<serde_json::Value>,
    #[serde(default, rename = "callbackURL")]
    pub callback_url: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_appends_domain_suffix() {
        assert_eq!(chat_id("5511999998888"), "5511999998888@c.us");
    }

    #[test]
    fn client_info_omits_absent_qr_code() {
        let info = ClientInfo {
            client_id: "abc".to_string(),
            qr_code: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"clientId":"abc"}"#);
    }

    #[test]
    fn send_message_request_uses_camel_case_client_id() {
        let req: SendMessageRequest =
            serde_json::from_str(r#"{"numero":"123","mensagem":"oi","clientId":"c1"}"#).unwrap();
        assert_eq!(req.client_id.as_deref(), Some("c1"));
    }

    #[test]
    fn add_callback_request_accepts_missing_fields() {
        let req: AddCallbackRequest = serde_json::from_str("{}").unwrap();
        assert!(req.client_id.is_none());
        assert!(req.callback_url.is_none());
    }
}
