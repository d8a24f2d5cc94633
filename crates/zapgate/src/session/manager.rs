//! Session lifecycle controller.
//!
//! Owns the registry, QR cache, and store, and is the only writer to all
//! three. Each registered client gets a bridge connection and a dedicated
//! event loop that turns bridge events into state transitions, QR cache
//! updates, snapshot writes, and callback dispatch. Constructed once at
//! startup and shared with the HTTP layer through `AppState`.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use zapgate_gateway_protocol::{
    AuthMethod, GatewayCommand, GatewayEvent, MediaPayload, MessageReceivedData,
};

use crate::api::{self, CHAT_ID_SUFFIX, ClientInfo};
use crate::callback::{CallbackDispatcher, CallbackEvent};
use crate::config::Config;
use crate::gateway::{Connector, ConnectorError};

use super::qr::QrCache;
use super::registry::{ClientHandle, CommandOutcome, Registry, SessionState};
use super::store::{PersistedSession, SessionStore, StoreError};

/// Maximum concurrent bridge startups during boot-time restore.
const RESTORE_CONCURRENCY: usize = 8;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid base64 media payload")]
    InvalidBase64,

    #[error("failed to fetch media from {url}: {message}")]
    Fetch { url: String, message: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client {0} not found")]
    ClientNotFound(String),

    #[error("client {0} is already registered")]
    AlreadyRegistered(String),

    #[error("failed to start bridge for client {client_id}: {source}")]
    Connect {
        client_id: String,
        #[source]
        source: ConnectorError,
    },

    #[error("timed out waiting for QR code for client {0}")]
    QrTimeout(String),

    #[error("send failed ({code}): {message}")]
    Send { code: String, message: String },

    #[error("timed out waiting for send acknowledgement from client {0}")]
    SendTimeout(String),

    #[error(transparent)]
    Media(#[from] MediaError),
}

// ============================================================================
// Settings & Inputs
// ============================================================================

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Prefix an inbound message must carry to be relayed.
    pub message_prefix: String,
    /// How often `wait_for_qr_code` re-checks the QR cache.
    pub qr_poll_interval: Duration,
    /// Upper bound on `wait_for_qr_code`; the wait always terminates.
    pub qr_wait_timeout: Duration,
    /// Upper bound on waiting for a send acknowledgement.
    pub send_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ManagerSettings {
    fn from(config: &Config) -> Self {
        Self {
            message_prefix: config.message_prefix.clone(),
            qr_poll_interval: config.qr_poll_interval(),
            qr_wait_timeout: config.qr_wait_timeout(),
            send_timeout: config.send_timeout(),
        }
    }
}

/// Source of an outbound media payload, before normalization.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// Inline base64 payload.
    Base64 { data: String },
    /// Remote URL to fetch.
    Url { url: String },
    /// Raw byte buffer.
    Bytes { data: Vec<u8> },
}

/// Result of boot-time session restore.
#[derive(Debug, Default)]
pub struct RestoreSummary {
    /// Sessions whose bridge was started again.
    pub restored: usize,
    /// Failures as (client_id, error message).
    pub errors: Vec<(String, String)>,
}

// ============================================================================
// Session Manager
// ============================================================================

pub struct SessionManager {
    registry: Registry,
    qr: QrCache,
    store: Arc<SessionStore>,
    dispatcher: CallbackDispatcher,
    connector: Arc<dyn Connector>,
    http: reqwest::Client,
    settings: ManagerSettings,
}

impl SessionManager {
    pub fn new(
        store: Arc<SessionStore>,
        connector: Arc<dyn Connector>,
        settings: ManagerSettings,
    ) -> Self {
        let registry = Registry::new();
        let http = reqwest::Client::new();
        let dispatcher = CallbackDispatcher::new(http.clone(), registry.clone());

        Self {
            registry,
            qr: QrCache::new(),
            store,
            dispatcher,
            connector,
            http,
            settings,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Registration & restore
    // ------------------------------------------------------------------

    /// Register a new client session.
    ///
    /// Generates the client id, starts the bridge, and returns immediately;
    /// the QR code arrives asynchronously and is picked up via
    /// [`Self::wait_for_qr_code`].
    pub async fn register_client(
        &self,
        callback_url: Option<String>,
    ) -> Result<String, SessionError> {
        let client_id = Uuid::new_v4().to_string();
        self.start_session(client_id.clone(), callback_url).await?;
        Ok(client_id)
    }

    /// Reconnect every session recorded in the snapshot.
    ///
    /// Startups run concurrently; each completion re-saves the snapshot,
    /// which is harmless because the set is idempotent per id.
    pub async fn restore_persisted_sessions(&self) -> RestoreSummary {
        let persisted = self.store.load().await;

        let results: Vec<(String, Result<(), SessionError>)> = stream::iter(persisted)
            .map(|entry| async move {
                let client_id = entry.client_id.clone();
                let result = self
                    .start_session(entry.client_id, entry.callback_url)
                    .await;
                (client_id, result)
            })
            .buffer_unordered(RESTORE_CONCURRENCY)
            .collect()
            .await;

        let mut summary = RestoreSummary::default();
        for (client_id, result) in results {
            match result {
                Ok(()) => summary.restored += 1,
                Err(e) => {
                    warn!(client_id = %client_id, error = %e, "Failed to restore session");
                    summary.errors.push((client_id, e.to_string()));
                }
            }
        }
        summary
    }

    async fn start_session(
        &self,
        client_id: String,
        callback_url: Option<String>,
    ) -> Result<(), SessionError> {
        if self.registry.contains(&client_id) {
            return Err(SessionError::AlreadyRegistered(client_id));
        }

        let connection =
            self.connector
                .connect(&client_id)
                .await
                .map_err(|source| SessionError::Connect {
                    client_id: client_id.clone(),
                    source,
                })?;

        let handle = Arc::new(ClientHandle::new(
            client_id.clone(),
            connection.commands,
            callback_url,
        ));

        // Atomic check-and-insert: a concurrent start for the same id loses
        // and its connection is dropped, which tears down its bridge.
        if !self.registry.try_insert(handle.clone()) {
            return Err(SessionError::AlreadyRegistered(client_id));
        }

        tokio::spawn(run_event_loop(
            self.lifecycle_ctx(),
            handle,
            connection.events,
        ));

        // Snapshot failure is non-fatal: in-memory state stays authoritative
        if let Err(e) = persist_registry(&self.registry, &self.store).await {
            error!(
                client_id = %client_id,
                error = %e,
                "Failed to save clients to file after registering client"
            );
        }

        info!(client_id = %client_id, "Client session started");
        Ok(())
    }

    // ------------------------------------------------------------------
    // QR codes
    // ------------------------------------------------------------------

    /// Block until a QR code exists for the client, polling the cache.
    ///
    /// QR generation is a one-shot external event with no other consumer, so
    /// polling is the whole contract; the wait is bounded by
    /// `qr_wait_timeout` so a caller is never stuck when the bridge
    /// authenticates directly (restored session) or never produces a code.
    pub async fn wait_for_qr_code(&self, client_id: &str) -> Result<String, SessionError> {
        let deadline = Instant::now() + self.settings.qr_wait_timeout;

        loop {
            if !self.registry.contains(client_id) {
                return Err(SessionError::ClientNotFound(client_id.to_string()));
            }
            if let Some(qr_code) = self.qr.get(client_id) {
                return Ok(qr_code);
            }
            if Instant::now() >= deadline {
                return Err(SessionError::QrTimeout(client_id.to_string()));
            }
            tokio::time::sleep(self.settings.qr_poll_interval).await;
        }
    }

    /// Current QR code, if the client is between `qr` and authentication.
    pub fn get_qr_code(&self, client_id: &str) -> Option<String> {
        self.qr.get(client_id)
    }

    /// All live clients joined with their pending QR codes.
    pub fn list_clients(&self) -> Vec<ClientInfo> {
        self.registry
            .handles()
            .into_iter()
            .map(|handle| ClientInfo {
                qr_code: self.qr.get(handle.client_id()),
                client_id: handle.client_id().to_string(),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Disconnect & callback URL
    // ------------------------------------------------------------------

    /// Disconnect a client and remove all of its state.
    ///
    /// Returns `false` for unknown ids without touching the snapshot, so
    /// retries are harmless.
    pub async fn disconnect_client(&self, client_id: &str) -> bool {
        let Some(handle) = self.registry.get(client_id) else {
            return false;
        };

        // Teardown before removal: stop the event loop first so no stale
        // event can mutate state for an id that is about to disappear.
        handle.cancel();
        let _ = handle.send_command(GatewayCommand::Disconnect).await;

        let callback_url = handle.callback_url().await;
        if self.registry.remove(client_id).is_none() {
            // A remote disconnect finished the cleanup concurrently.
            return true;
        }
        self.qr.remove(client_id);
        handle.set_state(SessionState::Disconnected).await;
        handle.fail_all_pending("client disconnected").await;

        if let Err(e) = persist_registry(&self.registry, &self.store).await {
            error!(
                client_id,
                error = %e,
                "Failed to save clients to file after disconnecting client"
            );
        }

        self.dispatcher.dispatch_to(
            callback_url,
            client_id,
            format!("Cliente {} desconectado", client_id),
            CallbackEvent::Disconnected,
            None,
        );

        info!(client_id, "Client disconnected and removed");
        true
    }

    /// Set (or replace) the callback URL for a live client.
    pub async fn add_callback_url(&self, client_id: &str, url: &str) -> Result<(), SessionError> {
        let handle = self.lookup(client_id)?;
        handle.set_callback_url(Some(url.to_string())).await;

        if let Err(e) = persist_registry(&self.registry, &self.store).await {
            error!(
                client_id,
                error = %e,
                "Failed to save clients to file after adding callback URL"
            );
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a text message through the client's bridge.
    ///
    /// Sends against a registered-but-unauthenticated client are attempted;
    /// the bridge's error comes back as a send failure. Nothing is retried.
    pub async fn send_text(
        &self,
        client_id: &str,
        numero: &str,
        mensagem: &str,
    ) -> Result<(), SessionError> {
        let handle = self.lookup(client_id)?;
        let chat_id = api::chat_id(numero);
        let content = mensagem.to_string();

        self.deliver(&handle, move |request_id| GatewayCommand::SendMessage {
            request_id,
            chat_id,
            content,
        })
        .await
    }

    /// Normalize a media source and send it through the client's bridge.
    pub async fn send_media(
        &self,
        client_id: &str,
        numero: &str,
        source: MediaSource,
        file_type: &str,
        caption: Option<String>,
    ) -> Result<(), SessionError> {
        let handle = self.lookup(client_id)?;
        let media = self.normalize_media(source, file_type).await?;
        let chat_id = api::chat_id(numero);

        self.deliver(&handle, move |request_id| GatewayCommand::SendMedia {
            request_id,
            chat_id,
            media,
            caption,
        })
        .await
    }

    /// Normalize a media source to the bridge's base64 representation.
    ///
    /// Malformed base64 is rejected here, before any bridge contact.
    async fn normalize_media(
        &self,
        source: MediaSource,
        file_type: &str,
    ) -> Result<MediaPayload, MediaError> {
        let data = match source {
            MediaSource::Base64 { data } => {
                BASE64
                    .decode(data.as_bytes())
                    .map_err(|_| MediaError::InvalidBase64)?;
                data
            }
            MediaSource::Url { url } => {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| MediaError::Fetch {
                        url: url.clone(),
                        message: e.to_string(),
                    })?;
                let bytes = response.bytes().await.map_err(|e| MediaError::Fetch {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
                BASE64.encode(&bytes)
            }
            MediaSource::Bytes { data } => BASE64.encode(&data),
        };

        Ok(MediaPayload {
            data,
            mime_type: file_type.to_string(),
            filename: None,
        })
    }

    /// Send an acknowledged command and wait for the bridge's answer.
    async fn deliver(
        &self,
        handle: &Arc<ClientHandle>,
        build: impl FnOnce(String) -> GatewayCommand,
    ) -> Result<(), SessionError> {
        let request_id = Uuid::new_v4().to_string();
        let ack = handle.register_pending(&request_id).await;

        if handle.send_command(build(request_id.clone())).await.is_err() {
            // Handle torn down concurrently; the client is not reachable
            handle.discard_pending(&request_id).await;
            return Err(SessionError::ClientNotFound(
                handle.client_id().to_string(),
            ));
        }

        match tokio::time::timeout(self.settings.send_timeout, ack).await {
            Ok(Ok(CommandOutcome::Delivered { .. })) => Ok(()),
            Ok(Ok(CommandOutcome::Failed { code, message })) => {
                Err(SessionError::Send { code, message })
            }
            Ok(Err(_)) => Err(SessionError::Send {
                code: "disconnected".to_string(),
                message: "connection closed before acknowledgement".to_string(),
            }),
            Err(_) => {
                handle.discard_pending(&request_id).await;
                Err(SessionError::SendTimeout(handle.client_id().to_string()))
            }
        }
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Stop every session's event loop and ask the bridges to disconnect.
    ///
    /// The snapshot is left untouched so the sessions reconnect on the next
    /// boot.
    pub async fn shutdown_all(&self) {
        info!("Shutting down session manager");
        for handle in self.registry.handles() {
            handle.cancel();
            let _ = handle.send_command(GatewayCommand::Disconnect).await;
            handle.fail_all_pending("server shutting down").await;
        }
    }

    fn lookup(&self, client_id: &str) -> Result<Arc<ClientHandle>, SessionError> {
        self.registry
            .get(client_id)
            .ok_or_else(|| SessionError::ClientNotFound(client_id.to_string()))
    }

    fn lifecycle_ctx(&self) -> LifecycleCtx {
        LifecycleCtx {
            registry: self.registry.clone(),
            qr: self.qr.clone(),
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
            message_prefix: self.settings.message_prefix.clone(),
        }
    }
}

/// Rewrite the snapshot from the current registry contents.
async fn persist_registry(registry: &Registry, store: &SessionStore) -> Result<(), StoreError> {
    let mut sessions = Vec::new();
    for handle in registry.handles() {
        sessions.push(PersistedSession {
            client_id: handle.client_id().to_string(),
            callback_url: handle.callback_url().await,
        });
    }
    store.save_all(&sessions).await
}

// ============================================================================
// Lifecycle Event Loop
// ============================================================================

/// Everything the per-session event loop needs, detached from the manager.
#[derive(Clone)]
struct LifecycleCtx {
    registry: Registry,
    qr: QrCache,
    store: Arc<SessionStore>,
    dispatcher: CallbackDispatcher,
    message_prefix: String,
}

/// Consume bridge events for one session until teardown.
///
/// No error on this path may escape: every arm handles its own failures, so
/// a misbehaving bridge or callback endpoint cannot crash the process.
async fn run_event_loop(
    ctx: LifecycleCtx,
    handle: Arc<ClientHandle>,
    mut events: tokio::sync::mpsc::Receiver<GatewayEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = handle.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    finish_session(&ctx, &handle, "bridge event channel closed").await;
                    break;
                }
            },
        };

        if apply_event(&ctx, &handle, event).await {
            break;
        }
    }

    debug!(client_id = handle.client_id(), "Session event loop stopped");
}

/// Apply one bridge event. Returns `true` when the session is finished.
async fn apply_event(ctx: &LifecycleCtx, handle: &Arc<ClientHandle>, event: GatewayEvent) -> bool {
    let client_id = handle.client_id();

    match event {
        GatewayEvent::AuthRequired {
            method: AuthMethod::QrCode { qr_data, .. },
        } => {
            // A refreshed code overwrites the previous one; pairing is not
            // an externally meaningful milestone, so no callback fires.
            ctx.qr.insert(client_id, qr_data);
            handle.set_state(SessionState::AwaitingQr).await;
            debug!(client_id, "QR code updated");
            false
        }

        GatewayEvent::Authenticated => {
            ctx.qr.remove(client_id);
            handle.set_state(SessionState::Authenticated).await;
            info!(client_id, "Client authenticated");
            ctx.dispatcher
                .dispatch(
                    client_id,
                    format!("Cliente {} autenticado com sucesso", client_id),
                    CallbackEvent::Authenticated,
                    None,
                )
                .await;
            false
        }

        GatewayEvent::Ready => {
            ctx.qr.remove(client_id);
            handle.set_state(SessionState::Ready).await;
            info!(client_id, "Client ready");
            ctx.dispatcher
                .dispatch(
                    client_id,
                    format!("Cliente {} está pronto!", client_id),
                    CallbackEvent::Ready,
                    None,
                )
                .await;
            false
        }

        GatewayEvent::AuthFailure { message } => {
            ctx.qr.remove(client_id);
            handle.set_state(SessionState::AuthFailed).await;
            error!(client_id, message = %message, "Client authentication failed");
            ctx.dispatcher
                .dispatch(
                    client_id,
                    format!("Falha na autenticação do cliente {}: {}", client_id, message),
                    CallbackEvent::AuthFailure,
                    None,
                )
                .await;
            false
        }

        GatewayEvent::MessageReceived(data) => {
            relay_inbound_message(ctx, client_id, *data).await;
            false
        }

        GatewayEvent::CommandOk {
            request_id,
            message_id,
        } => {
            handle
                .resolve_pending(&request_id, CommandOutcome::Delivered { message_id })
                .await;
            false
        }

        GatewayEvent::CommandError {
            request_id,
            code,
            message,
        } => {
            warn!(client_id, code = %code, message = %message, "Bridge command failed");
            handle
                .resolve_pending(&request_id, CommandOutcome::Failed { code, message })
                .await;
            false
        }

        GatewayEvent::Error {
            code,
            message,
            fatal,
        } => {
            if fatal {
                error!(client_id, code = %code, message = %message, "Fatal bridge error");
                finish_session(ctx, handle, &message).await;
                true
            } else {
                warn!(client_id, code = %code, message = %message, "Bridge error");
                false
            }
        }

        GatewayEvent::Disconnected { reason } => {
            finish_session(ctx, handle, &reason).await;
            true
        }
    }
}

/// Relay an inbound message to the callback URL if it carries the prefix.
///
/// Messages without the prefix are dropped: this is a selective relay, not
/// an inbox.
async fn relay_inbound_message(ctx: &LifecycleCtx, client_id: &str, message: MessageReceivedData) {
    let Some(body) = strip_relay_prefix(
        message.content.as_text().unwrap_or_default(),
        &ctx.message_prefix,
    ) else {
        return;
    };

    let numero_from = message
        .chat_id
        .strip_suffix(CHAT_ID_SUFFIX)
        .unwrap_or(&message.chat_id)
        .to_string();

    info!(client_id, from = %message.chat_id, "Relaying inbound message");
    ctx.dispatcher
        .dispatch(
            client_id,
            body,
            CallbackEvent::Message,
            Some(serde_json::json!({ "numeroFrom": numero_from })),
        )
        .await;
}

/// Match the relay prefix case-insensitively and return the stripped body.
fn strip_relay_prefix(text: &str, prefix: &str) -> Option<String> {
    let text = text.trim();
    let head = text.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    Some(text[prefix.len()..].trim().to_string())
}

/// Remote-initiated teardown: same cleanup as an explicit disconnect, minus
/// the bridge `Disconnect` command (the bridge is already gone).
async fn finish_session(ctx: &LifecycleCtx, handle: &Arc<ClientHandle>, reason: &str) {
    let client_id = handle.client_id().to_string();
    let callback_url = handle.callback_url().await;

    handle.cancel();
    if ctx.registry.remove(&client_id).is_none() {
        // An explicit disconnect got here first.
        return;
    }
    ctx.qr.remove(&client_id);
    handle.set_state(SessionState::Disconnected).await;
    handle.fail_all_pending("client disconnected").await;

    if let Err(e) = persist_registry(&ctx.registry, &ctx.store).await {
        error!(
            client_id = %client_id,
            error = %e,
            "Failed to save clients to file after client disconnected"
        );
    }

    ctx.dispatcher.dispatch_to(
        callback_url,
        &client_id,
        format!("Cliente {} desconectado", client_id),
        CallbackEvent::Disconnected,
        None,
    );

    info!(client_id = %client_id, reason, "Client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
