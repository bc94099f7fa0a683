//! Application layer: the session state machine and request correlator.
//!
//! The split mirrors the two halves of the client's contract:
//!
//! - [`session`] owns the one logical session to one device — connection,
//!   silent re-authentication, interactive PIN pairing, teardown.
//! - [`correlator`] owns the in-flight request table once the session is
//!   ready — correlation ids in, settled results out, timers in between.

use std::time::Duration;

use thiserror::Error;

use crate::infrastructure::network::discovery::DiscoveryError;
use crate::infrastructure::network::transport::TransportError;
use crate::infrastructure::storage::credentials::StoreError;

pub mod correlator;
pub mod session;

/// Errors surfaced to callers of the control client.
///
/// The variants are deliberately distinct rather than one generic failure:
/// a caller reacts differently to "need to re-pair" (`Rejected`),
/// "transient timeout, the same request may be retried" (`Timeout`), and
/// "hard disconnect, must reconnect" (`TransportClosed`). No operation in
/// this client retries on its own; retry decisions belong to the caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No explicit address, no stored credential, no discovered device.
    #[error("no target available: pass an address, or discover/pair a device first")]
    NoTarget,

    /// An operation requiring a ready session ran without one.
    #[error("not connected")]
    NotConnected,

    /// A `connect` is already in flight on this session.
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    /// An interactive pairing flow is already in flight on this session.
    #[error("a pairing attempt is already in progress")]
    PairingInProgress,

    /// `pair` was called while the session is not awaiting a PIN.
    #[error("no pairing in progress")]
    NotPairing,

    /// Registration, pairing submission, or a request exceeded its timer.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The device explicitly refused (bad PIN, permission denial).
    #[error("device rejected: {0}")]
    Rejected(String),

    /// The underlying connection dropped.
    #[error("connection closed")]
    TransportClosed,

    /// Transport-level failure (handshake, endpoint unreachable).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Discovery socket failure.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Credential store write failure.
    #[error(transparent)]
    Storage(#[from] StoreError),
}
