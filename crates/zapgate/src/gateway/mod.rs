//! Messaging-bridge integration.
//!
//! The bridge is an external process that drives one WhatsApp Web session
//! through browser automation; zapgate only sees its interface: a command
//! channel in, an event channel out. The [`Connector`] trait is the seam the
//! session manager depends on, so tests can substitute an in-process
//! scripted bridge.

pub mod subprocess;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use zapgate_gateway_protocol::{GatewayCommand, GatewayEvent};

pub use subprocess::SubprocessConnector;

/// Channel pair for one live bridge connection.
pub struct Connection {
    /// Commands to the bridge.
    pub commands: mpsc::Sender<GatewayCommand>,
    /// Events from the bridge.
    pub events: mpsc::Receiver<GatewayEvent>,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("failed to spawn bridge process: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Creates one bridge connection per client session.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Start a bridge for `client_id` and return its channel pair.
    ///
    /// Must return without waiting for the session to authenticate; pairing
    /// progress arrives on the event channel.
    async fn connect(&self, client_id: &str) -> Result<Connection, ConnectorError>;
}
