//! Client registration, QR retrieval, disconnection, and callback handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::api::{
    AddCallbackRequest, ClientInfo, ParamErrorBody, QrCodeResponse, RegisterResponse, StatusBody,
};
use crate::server::AppState;
use crate::session::SessionError;

/// GET /register
///
/// Registers a new client and blocks until its pairing QR code is available
/// (bounded by the configured QR wait timeout).
pub async fn register_client(State(state): State<AppState>) -> Response {
    let client_id = match state.manager.register_client(None).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "Error registering client");
            return qr_generation_failed();
        }
    };

    match state.manager.wait_for_qr_code(&client_id).await {
        Ok(qr_code) => (
            StatusCode::OK,
            Json(RegisterResponse {
                success: true,
                client_id,
                qr_code,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(client_id = %client_id, error = %e, "Error waiting for QR code");
            qr_generation_failed()
        }
    }
}

fn qr_generation_failed() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(StatusBody::failure("Erro ao gerar QR Code")),
    )
        .into_response()
}

/// GET /clients
pub async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientInfo>> {
    Json(state.manager.list_clients())
}

/// GET /getQRCode/{uuid}
pub async fn get_qr_code(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    match state.manager.get_qr_code(&uuid) {
        Some(qr_code) => (
            StatusCode::OK,
            Json(QrCodeResponse {
                success: true,
                qr_code,
            }),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(StatusBody::failure(
                "QR Code não encontrado ou cliente já autenticado",
            )),
        )
            .into_response(),
    }
}

/// DELETE /disconnect/{uuid}
pub async fn disconnect_client(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Response {
    if state.manager.disconnect_client(&uuid).await {
        (
            StatusCode::OK,
            Json(StatusBody::ok(format!(
                "Cliente {} desconectado com sucesso",
                uuid
            ))),
        )
            .into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(StatusBody::failure("Cliente não encontrado")),
        )
            .into_response()
    }
}

/// POST /addCallbackUrl
pub async fn add_callback_url(
    State(state): State<AppState>,
    Json(req): Json<AddCallbackRequest>,
) -> Response {
    let (Some(client_id_value), Some(callback_url_value)) = (req.client_id, req.callback_url)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ParamErrorBody::new(
                "Missing parameters: clientId and callbackURL are required",
            )),
        )
            .into_response();
    };

    let (Some(client_id), Some(callback_url)) =
        (client_id_value.as_str(), callback_url_value.as_str())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ParamErrorBody::new(
                "Invalid parameters: clientId and callbackURL must be strings",
            )),
        )
            .into_response();
    };

    match state.manager.add_callback_url(client_id, callback_url).await {
        Ok(()) => (
            StatusCode::OK,
            Json(StatusBody::ok("Callback URL added successfully")),
        )
            .into_response(),
        Err(SessionError::ClientNotFound(id)) => (
            StatusCode::NOT_FOUND,
            Json(StatusBody::failure(format!("Client {} not found", id))),
        )
            .into_response(),
        Err(e) => {
            error!(client_id, error = %e, "Error adding callback URL");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusBody::failure("Internal server error")),
            )
                .into_response()
        }
    }
}
