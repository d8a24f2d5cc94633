//! Session lifecycle core.
//!
//! - [`SessionStore`]: durable snapshot of registered clients
//! - [`QrCache`]: transient pairing-code cache
//! - [`Registry`]: in-memory map of live connection handles
//! - [`SessionManager`]: drives each session through its lifecycle and
//!   bridges gateway events to callbacks

mod manager;
mod qr;
mod registry;
mod store;

pub use manager::{
    ManagerSettings, MediaError, MediaSource, RestoreSummary, SessionError, SessionManager,
};
pub use qr::QrCache;
pub use registry::{ClientHandle, CommandOutcome, Registry, SessionState};
pub use store::{PersistedSession, SessionStore, StoreError};
