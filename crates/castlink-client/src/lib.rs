//! # castlink-client
//!
//! Stateful control client for CastLink-enabled smart displays.
//!
//! The client finds a device on the local network, performs the
//! challenge/response pairing handshake to obtain a long-lived secret, and
//! then issues asynchronous command requests over a persistent WebSocket,
//! correlating each request with its eventual response or error under a
//! timeout.
//!
//! # Architecture
//!
//! - **`infrastructure::storage`** – durable, address-keyed persistence of
//!   pairing secrets (plaintext JSON, platform config directory).
//! - **`infrastructure::network::discovery`** – one-shot, time-bounded
//!   multicast probe with a vendor-marker descriptor filter.
//! - **`application::session`** – the connection & pairing state machine:
//!   silent re-authentication when a credential exists, interactive PIN
//!   pairing on first contact, explicit teardown.
//! - **`application::correlator`** – the per-session pending-request
//!   table: correlation ids out, settled results in, timers fused with
//!   removal.
//! - **`infrastructure::network::input_channel`** – the fire-and-forget
//!   pointer/button sub-channel, opened lazily on first use.
//!
//! Higher-level command verbs (volume, app launch, media transport) are a
//! thin layer over [`CastClient::send`] and live with the caller; this
//! crate owns the session, not the vocabulary.

pub mod application;
pub mod config;
pub mod infrastructure;

pub use application::session::{CastClient, ConnectStatus, SessionState};
pub use application::ClientError;
pub use config::ClientConfig;
pub use infrastructure::network::discovery::{
    discover, DiscoveredDevice, DiscoveryConfig, DiscoveryError,
};
pub use infrastructure::network::transport::TransportError;
pub use infrastructure::storage::credentials::{
    Credential, CredentialStore, StoreError, TransportMode,
};

// Re-exported so callers can build pointer events without naming the core
// crate directly.
pub use castlink_core::PointerEvent;
