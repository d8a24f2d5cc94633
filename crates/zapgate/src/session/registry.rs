//! In-memory registry of live client sessions.
//!
//! Presence in the registry is the single authority for "this client is
//! live": at most one handle exists per client id, and every operation that
//! targets a client starts with a registry lookup.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use zapgate_gateway_protocol::GatewayCommand;

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of one client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Bridge started, no pairing event seen yet.
    Connecting,
    /// A QR code is pending scan.
    AwaitingQr,
    /// Pairing completed, connection still warming up.
    Authenticated,
    /// Fully connected.
    Ready,
    /// Pairing failed; terminal.
    AuthFailed,
    /// Connection torn down; terminal.
    Disconnected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::AwaitingQr => write!(f, "awaiting_qr"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::AuthFailed => write!(f, "auth_failed"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

// ============================================================================
// Client Handle
// ============================================================================

/// Outcome of an acknowledged bridge command.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Delivered { message_id: Option<String> },
    Failed { code: String, message: String },
}

/// Live connection handle for one client.
///
/// Owns the command channel to the bridge, the mutable callback URL, the
/// table of in-flight command acknowledgements, and the cancellation token
/// that stops the session's event loop.
pub struct ClientHandle {
    client_id: String,
    commands: mpsc::Sender<GatewayCommand>,
    callback_url: RwLock<Option<String>>,
    state: RwLock<SessionState>,
    pending: Mutex<HashMap<String, oneshot::Sender<CommandOutcome>>>,
    cancel: CancellationToken,
}

impl ClientHandle {
    pub fn new(
        client_id: String,
        commands: mpsc::Sender<GatewayCommand>,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            client_id,
            commands,
            callback_url: RwLock::new(callback_url),
            state: RwLock::new(SessionState::Connecting),
            pending: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub async fn callback_url(&self) -> Option<String> {
        self.callback_url.read().await.clone()
    }

    pub async fn set_callback_url(&self, url: Option<String>) {
        *self.callback_url.write().await = url;
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }

    /// Stop this session's event loop. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Completes once `cancel` has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Queue a command for the bridge. Fails if the bridge side is gone.
    pub async fn send_command(&self, command: GatewayCommand) -> Result<(), ChannelClosed> {
        self.commands.send(command).await.map_err(|_| ChannelClosed)
    }

    /// Register interest in the acknowledgement of `request_id`.
    pub async fn register_pending(&self, request_id: &str) -> oneshot::Receiver<CommandOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.to_string(), tx);
        rx
    }

    /// Resolve an in-flight command. Unknown ids are ignored (the waiter may
    /// have timed out and been discarded).
    pub async fn resolve_pending(&self, request_id: &str, outcome: CommandOutcome) {
        if let Some(tx) = self.pending.lock().await.remove(request_id) {
            let _ = tx.send(outcome);
        }
    }

    /// Drop interest in an acknowledgement (timeout or failed enqueue).
    pub async fn discard_pending(&self, request_id: &str) {
        self.pending.lock().await.remove(request_id);
    }

    /// Fail every in-flight command; called on teardown so a send racing a
    /// disconnect gets a clean error instead of hanging.
    pub async fn fail_all_pending(&self, message: &str) {
        let waiters: Vec<_> = self.pending.lock().await.drain().collect();
        for (_, tx) in waiters {
            let _ = tx.send(CommandOutcome::Failed {
                code: "disconnected".to_string(),
                message: message.to_string(),
            });
        }
    }
}

/// The command channel to the bridge is closed.
#[derive(Debug)]
pub struct ChannelClosed;

// ============================================================================
// Registry
// ============================================================================

/// Shared map of client id → live handle. Cheap to clone.
#[derive(Clone, Default)]
pub struct Registry {
    handles: Arc<DashMap<String, Arc<ClientHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<ClientHandle>) {
        self.handles.insert(handle.client_id().to_string(), handle);
    }

    /// Insert only if the id is free; at most one handle may exist per id.
    pub fn try_insert(&self, handle: Arc<ClientHandle>) -> bool {
        match self.handles.entry(handle.client_id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<ClientHandle>> {
        self.handles.get(client_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, client_id: &str) -> Option<Arc<ClientHandle>> {
        self.handles.remove(client_id).map(|(_, handle)| handle)
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.handles.contains_key(client_id)
    }

    /// Snapshot of all live handles.
    pub fn handles(&self) -> Vec<Arc<ClientHandle>> {
        self.handles
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Callback URL for a client, if it is live and has one set.
    pub async fn callback_url(&self, client_id: &str) -> Option<String> {
        match self.get(client_id) {
            Some(handle) => handle.callback_url().await,
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
