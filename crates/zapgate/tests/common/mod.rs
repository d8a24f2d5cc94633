//! Common test utilities.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::post;
use tokio::sync::{Mutex, mpsc};

use zapgate::config::Config;
use zapgate::gateway::{Connection, Connector, ConnectorError};
use zapgate::server::{self, AppState};
use zapgate::session::{ManagerSettings, SessionManager, SessionStore};
use zapgate_gateway_protocol::{AuthMethod, GatewayCommand, GatewayEvent};

/// QR code the fake bridge hands out on connect.
pub const FAKE_QR: &str = "data:image/png;base64,ZmFrZS1xcg==";

// ============================================================================
// Fake Bridge
// ============================================================================

/// In-process bridge standing in for the browser-automation process.
///
/// On connect it plays an initial event script, then acknowledges every send
/// command (Ok or Error per configuration) and records it. Tests can inject
/// further events for a client through [`TestContext::emit`].
struct FakeBridgeConnector {
    initial: Vec<GatewayEvent>,
    ack_error: bool,
    sent: Arc<Mutex<Vec<GatewayCommand>>>,
    taps: Arc<Mutex<HashMap<String, mpsc::Sender<GatewayEvent>>>>,
}

#[async_trait]
impl Connector for FakeBridgeConnector {
    async fn connect(&self, client_id: &str) -> Result<Connection, ConnectorError> {
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<GatewayCommand>(16);
        let (evt_tx, evt_rx) = mpsc::channel(16);

        self.taps
            .lock()
            .await
            .insert(client_id.to_string(), evt_tx.clone());

        let initial = self.initial.clone();
        let ack_error = self.ack_error;
        let sent = self.sent.clone();

        tokio::spawn(async move {
            for event in initial {
                if evt_tx.send(event).await.is_err() {
                    return;
                }
            }
            while let Some(command) = cmd_rx.recv().await {
                sent.lock().await.push(command.clone());
                let request_id = match &command {
                    GatewayCommand::SendMessage { request_id, .. }
                    | GatewayCommand::SendMedia { request_id, .. } => request_id.clone(),
                    GatewayCommand::Disconnect => break,
                };
                let response = if ack_error {
                    GatewayEvent::CommandError {
                        request_id,
                        code: "not_connected".to_string(),
                        message: "session is not connected".to_string(),
                    }
                } else {
                    GatewayEvent::CommandOk {
                        request_id,
                        message_id: None,
                    }
                };
                if evt_tx.send(response).await.is_err() {
                    return;
                }
            }
        });

        Ok(Connection {
            commands: cmd_tx,
            events: evt_rx,
        })
    }
}

// ============================================================================
// Test Context
// ============================================================================

pub struct TestContext {
    pub app: Router,
    pub manager: Arc<SessionManager>,
    pub clients_file: PathBuf,
    pub sent: Arc<Mutex<Vec<GatewayCommand>>>,
    taps: Arc<Mutex<HashMap<String, mpsc::Sender<GatewayEvent>>>>,
}

impl TestContext {
    /// Inject a bridge event for a live client.
    pub async fn emit(&self, client_id: &str, event: GatewayEvent) {
        let taps = self.taps.lock().await;
        let tx = taps.get(client_id).expect("no fake bridge for client");
        tx.send(event).await.expect("bridge event channel closed");
    }
}

/// Context whose fake bridge emits a QR on connect and acks sends with Ok.
pub async fn test_context() -> TestContext {
    build_context(vec![qr_event(FAKE_QR)], false, Duration::from_secs(2)).await
}

/// Context with a custom initial script / ack behavior / QR wait bound.
pub async fn build_context(
    initial: Vec<GatewayEvent>,
    ack_error: bool,
    qr_wait_timeout: Duration,
) -> TestContext {
    use tempfile::TempDir;

    let tmp = TempDir::new().unwrap();
    // Leak the TempDir so it doesn't get cleaned up during the test.
    let tmp = Box::leak(Box::new(tmp));
    let clients_file = tmp.path().join("clients.json");

    let sent = Arc::new(Mutex::new(Vec::new()));
    let taps = Arc::new(Mutex::new(HashMap::new()));
    let connector = FakeBridgeConnector {
        initial,
        ack_error,
        sent: sent.clone(),
        taps: taps.clone(),
    };

    let settings = ManagerSettings {
        message_prefix: "Pergunta:".to_string(),
        qr_poll_interval: Duration::from_millis(10),
        qr_wait_timeout,
        send_timeout: Duration::from_secs(1),
    };

    let store = Arc::new(SessionStore::new(&clients_file));
    let manager = Arc::new(SessionManager::new(store, Arc::new(connector), settings));

    let app = server::build_app(
        AppState {
            manager: manager.clone(),
        },
        &Config::default(),
    );

    TestContext {
        app,
        manager,
        clients_file,
        sent,
        taps,
    }
}

pub fn qr_event(data: &str) -> GatewayEvent {
    GatewayEvent::AuthRequired {
        method: AuthMethod::QrCode {
            qr_data: data.to_string(),
            expires_in: 20,
        },
    }
}

// ============================================================================
// Callback Receiver
// ============================================================================

/// Local HTTP endpoint that records every callback POST it receives.
pub struct CallbackReceiver {
    pub url: String,
    pub received: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn record_callback(
    State(received): State<Arc<Mutex<Vec<serde_json::Value>>>>,
    Json(body): Json<serde_json::Value>,
) -> &'static str {
    received.lock().await.push(body);
    "ok"
}

pub async fn spawn_callback_receiver() -> CallbackReceiver {
    let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route("/hook", post(record_callback))
        .with_state(received.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    CallbackReceiver {
        url: format!("http://{}/hook", addr),
        received,
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Poll an async condition until it holds or a 3 s deadline passes.
pub async fn wait_for<F, Fut>(mut check: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
