//! Outbound message and media handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::error;

use crate::api::{ErrorBody, SendMediaRequest, SendMessageRequest, StatusBody};
use crate::server::AppState;
use crate::session::{MediaError, MediaSource, SessionError};

/// POST /sendMessage
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let (Some(numero), Some(mensagem), Some(client_id)) = (
        non_empty(req.numero),
        non_empty(req.mensagem),
        non_empty(req.client_id),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::new("Número, mensagem e clientId são necessários")),
        )
            .into_response();
    };

    match state.manager.send_text(&client_id, &numero, &mensagem).await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusBody::ok("Mensagem enviada com sucesso")),
        )
            .into_response(),
        Err(SessionError::ClientNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("Cliente não encontrado")),
        )
            .into_response(),
        Err(e) => {
            error!(client_id = %client_id, error = %e, "Erro ao enviar mensagem");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusBody::failure("Erro ao enviar mensagem")),
            )
                .into_response()
        }
    }
}

/// POST /sendMedia
pub async fn send_media(
    State(state): State<AppState>,
    Json(req): Json<SendMediaRequest>,
) -> Response {
    let SendMediaRequest {
        client_id,
        numero,
        media_data,
        media_type,
        media_url,
        file_type,
        caption,
    } = req;

    let (Some(client_id), Some(numero)) = (non_empty(client_id), non_empty(numero)) else {
        return missing_media_fields();
    };
    if media_data.is_none() && media_url.is_none() {
        return missing_media_fields();
    }

    // Pick the source; decoding and URL fetching happen after the client
    // lookup, inside the manager.
    let source = match (media_data, media_type.as_deref(), media_url) {
        (Some(data), Some("base64"), _) => MediaSource::Base64 { data },
        (_, _, Some(url)) => MediaSource::Url { url },
        (Some(data), Some("byteArray"), _) => match BASE64.decode(data.as_bytes()) {
            Ok(bytes) => MediaSource::Bytes { data: bytes },
            Err(_) => return invalid_media_format(),
        },
        _ => return invalid_media_format(),
    };

    let file_type = file_type.unwrap_or_default();

    match state
        .manager
        .send_media(&client_id, &numero, source, &file_type, caption)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusBody::ok("Media sent successfully")),
        )
            .into_response(),
        Err(SessionError::ClientNotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("Client not found")),
        )
            .into_response(),
        Err(SessionError::Media(MediaError::InvalidBase64)) => invalid_media_format(),
        Err(e) => {
            error!(client_id = %client_id, error = %e, "Error sending media");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusBody::failure("Error sending media")),
            )
                .into_response()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn missing_media_fields() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new(
            "clientId, numero, and either mediaData or mediaUrl are required",
        )),
    )
        .into_response()
}

fn invalid_media_format() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new("Invalid media format provided")),
    )
        .into_response()
}
