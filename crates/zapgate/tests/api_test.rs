//! Integration tests for the HTTP API.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

mod common;

use common::{FAKE_QR, build_context, qr_event, spawn_callback_receiver, test_context, wait_for};
use zapgate_gateway_protocol::{
    GatewayCommand, GatewayEvent, MessageContent, MessageReceivedData, Sender,
};

// ============================================================================
// Helpers
// ============================================================================

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(path: &str, body: Value) -> Request<Body> {
    Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn register(ctx: &common::TestContext) -> String {
    let response = ctx
        .app
        .clone()
        .oneshot(Request::get("/register").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    json["clientId"].as_str().unwrap().to_string()
}

fn inbound_text(chat_id: &str, text: &str) -> GatewayEvent {
    GatewayEvent::MessageReceived(Box::new(MessageReceivedData {
        message_id: "msg-1".to_string(),
        chat_id: chat_id.to_string(),
        sender: Sender {
            id: chat_id.to_string(),
            display_name: None,
        },
        content: MessageContent::Text {
            text: text.to_string(),
        },
        timestamp: None,
    }))
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let ctx = test_context().await;

    let response = ctx
        .app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

// ============================================================================
// Registration & QR Codes
// ============================================================================

#[tokio::test]
async fn test_register_returns_client_and_qr() {
    let ctx = test_context().await;

    let response = ctx
        .app
        .clone()
        .oneshot(Request::get("/register").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(!json["clientId"].as_str().unwrap().is_empty());
    assert_eq!(json["qrCode"], FAKE_QR);
}

#[tokio::test]
async fn test_register_fails_when_qr_never_arrives() {
    // Bridge that authenticates directly and never emits a QR
    let ctx = build_context(vec![], false, Duration::from_millis(200)).await;

    let response = ctx
        .app
        .clone()
        .oneshot(Request::get("/register").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Erro ao gerar QR Code");
}

#[tokio::test]
async fn test_clients_lists_registered_sessions() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(Request::get("/clients").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let clients = json.as_array().unwrap();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0]["clientId"], client_id.as_str());
    assert_eq!(clients[0]["qrCode"], FAKE_QR);
}

#[tokio::test]
async fn test_get_qr_code_by_uuid() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::get(format!("/getQRCode/{}", client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["qrCode"], FAKE_QR);
}

#[tokio::test]
async fn test_get_qr_code_unknown_client() {
    let ctx = test_context().await;

    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::get("/getQRCode/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(
        json["message"],
        "QR Code não encontrado ou cliente já autenticado"
    );
}

#[tokio::test]
async fn test_qr_code_cleared_after_authentication() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    ctx.emit(&client_id, GatewayEvent::Authenticated).await;

    wait_for(
        || {
            let app = ctx.app.clone();
            let path = format!("/getQRCode/{}", client_id);
            async move {
                let response = app
                    .oneshot(Request::get(&path).body(Body::empty()).unwrap())
                    .await
                    .unwrap();
                response.status() == StatusCode::NOT_FOUND
            }
        },
        "QR code cleared after authentication",
    )
    .await;
}

// ============================================================================
// Send Message
// ============================================================================

#[tokio::test]
async fn test_send_message_missing_fields() {
    let ctx = test_context().await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json("/sendMessage", json!({"numero": "123"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Número, mensagem e clientId são necessários");
}

#[tokio::test]
async fn test_send_message_unknown_client() {
    let ctx = test_context().await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/sendMessage",
            json!({"numero": "1234567890", "mensagem": "hi", "clientId": "unknown"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Cliente não encontrado");
}

#[tokio::test]
async fn test_send_message_success() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/sendMessage",
            json!({"numero": "1234567890", "mensagem": "hi", "clientId": client_id}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Mensagem enviada com sucesso");

    let sent = ctx.sent.lock().await;
    match sent.first() {
        Some(GatewayCommand::SendMessage {
            chat_id, content, ..
        }) => {
            assert_eq!(chat_id, "1234567890@c.us");
            assert_eq!(content, "hi");
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[tokio::test]
async fn test_send_message_surfaces_bridge_error() {
    // Registered but not authenticated: the send is attempted and the
    // bridge's refusal comes back as a send error
    let ctx = build_context(vec![qr_event(FAKE_QR)], true, Duration::from_secs(2)).await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/sendMessage",
            json!({"numero": "1234567890", "mensagem": "hi", "clientId": client_id}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Erro ao enviar mensagem");
}

// ============================================================================
// Send Media
// ============================================================================

#[tokio::test]
async fn test_send_media_missing_fields() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/sendMedia",
            json!({"clientId": client_id, "numero": "123"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(
        json["error"],
        "clientId, numero, and either mediaData or mediaUrl are required"
    );
}

#[tokio::test]
async fn test_send_media_malformed_base64() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/sendMedia",
            json!({
                "clientId": client_id,
                "numero": "1234567890",
                "mediaData": "!!!not-base64!!!",
                "mediaType": "base64",
                "fileType": "image/png"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Invalid media format provided");

    // The bridge was never contacted
    let sent = ctx.sent.lock().await;
    assert!(
        !sent
            .iter()
            .any(|c| matches!(c, GatewayCommand::SendMedia { .. }))
    );
}

#[tokio::test]
async fn test_send_media_base64_success() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/sendMedia",
            json!({
                "clientId": client_id,
                "numero": "1234567890",
                "mediaData": "aGVsbG8=",
                "mediaType": "base64",
                "fileType": "image/png",
                "caption": "legenda"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Media sent successfully");

    let sent = ctx.sent.lock().await;
    match sent.first() {
        Some(GatewayCommand::SendMedia {
            chat_id,
            media,
            caption,
            ..
        }) => {
            assert_eq!(chat_id, "1234567890@c.us");
            assert_eq!(media.data, "aGVsbG8=");
            assert_eq!(media.mime_type, "image/png");
            assert_eq!(caption.as_deref(), Some("legenda"));
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[tokio::test]
async fn test_send_media_unknown_client() {
    let ctx = test_context().await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/sendMedia",
            json!({
                "clientId": "unknown",
                "numero": "1234567890",
                "mediaData": "aGVsbG8=",
                "mediaType": "base64",
                "fileType": "image/png"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Client not found");
}

// ============================================================================
// Disconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_flow() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::delete(format!("/disconnect/{}", client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(
        json["message"],
        format!("Cliente {} desconectado com sucesso", client_id)
    );

    // QR code gone
    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::get(format!("/getQRCode/{}", client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // No longer listed, and gone from the registry
    let response = ctx
        .app
        .clone()
        .oneshot(Request::get("/clients").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 0);
    assert!(!ctx.manager.registry().contains(&client_id));

    // Removed from the persisted snapshot
    let snapshot: Value =
        serde_json::from_str(&std::fs::read_to_string(&ctx.clients_file).unwrap()).unwrap();
    assert_eq!(snapshot.as_array().unwrap().len(), 0);

    // Retrying is a 404, not an error
    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::delete(format!("/disconnect/{}", client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Cliente não encontrado");
}

#[tokio::test]
async fn test_disconnect_unknown_leaves_snapshot_alone() {
    let ctx = test_context().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::delete("/disconnect/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let snapshot: Value =
        serde_json::from_str(&std::fs::read_to_string(&ctx.clients_file).unwrap()).unwrap();
    let entries = snapshot.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["clientId"], client_id.as_str());
}

// ============================================================================
// Callback URLs
// ============================================================================

#[tokio::test]
async fn test_add_callback_url_validation() {
    let ctx = test_context().await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json("/addCallbackUrl", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(
        json["error"],
        "Missing parameters: clientId and callbackURL are required"
    );

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/addCallbackUrl",
            json!({"clientId": 123, "callbackURL": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(
        json["error"],
        "Invalid parameters: clientId and callbackURL must be strings"
    );
}

#[tokio::test]
async fn test_add_callback_url_unknown_client() {
    let ctx = test_context().await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/addCallbackUrl",
            json!({"clientId": "missing", "callbackURL": "http://example.com/hook"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Client missing not found");
}

#[tokio::test]
async fn test_lifecycle_callbacks_are_delivered() {
    let ctx = test_context().await;
    let receiver = spawn_callback_receiver().await;
    let client_id = register(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(post_json(
            "/addCallbackUrl",
            json!({"clientId": client_id, "callbackURL": receiver.url.as_str()}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Callback URL added successfully");

    // READY fires exactly one callback POST
    ctx.emit(&client_id, GatewayEvent::Ready).await;
    let received = receiver.received.clone();
    wait_for(
        || {
            let received = received.clone();
            async move { received.lock().await.len() == 1 }
        },
        "READY callback",
    )
    .await;
    {
        let received = receiver.received.lock().await;
        assert_eq!(received[0]["clientId"], client_id.as_str());
        assert_eq!(received[0]["type"], "READY");
        assert_eq!(
            received[0]["message"],
            format!("Cliente {} está pronto!", client_id)
        );
    }

    // A prefixed inbound message is relayed with the prefix stripped
    ctx.emit(
        &client_id,
        inbound_text("5511999998888@c.us", "Pergunta: qual o horário?"),
    )
    .await;
    let received = receiver.received.clone();
    wait_for(
        || {
            let received = received.clone();
            async move { received.lock().await.len() == 2 }
        },
        "MESSAGE callback",
    )
    .await;
    {
        let received = receiver.received.lock().await;
        assert_eq!(received[1]["type"], "MESSAGE");
        assert_eq!(received[1]["message"], "qual o horário?");
        assert_eq!(received[1]["additionalData"]["numeroFrom"], "5511999998888");
    }

    // A message without the prefix is silently ignored
    ctx.emit(&client_id, inbound_text("5511999998888@c.us", "bom dia"))
        .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(receiver.received.lock().await.len(), 2);

    // Disconnecting fires a final DISCONNECTED callback
    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::delete(format!("/disconnect/{}", client_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let received = receiver.received.clone();
    wait_for(
        || {
            let received = received.clone();
            async move { received.lock().await.len() == 3 }
        },
        "DISCONNECTED callback",
    )
    .await;
    let received = receiver.received.lock().await;
    assert_eq!(received[2]["type"], "DISCONNECTED");
    assert_eq!(
        received[2]["message"],
        format!("Cliente {} desconectado", client_id)
    );
}
