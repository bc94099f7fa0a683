//! Client configuration.
//!
//! All timers are configurable so tests can run in milliseconds; the
//! defaults match the protocol's expectations against real devices.

use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::network::discovery::DiscoveryConfig;
use crate::infrastructure::storage::credentials::TransportMode;

/// Configuration for [`crate::CastClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device command port for plain (`ws://`) sessions.
    pub command_port: u16,
    /// Device command port for secure (`wss://`) sessions.
    pub secure_command_port: u16,
    /// Transport mode used when no credential records one for the address.
    pub default_transport_mode: TransportMode,
    /// Bound on registration: silent re-auth confirmation, or the pairing
    /// challenge on first contact.
    pub registration_timeout: Duration,
    /// Bound on the PIN submission request, independent of the
    /// registration timer.
    pub pairing_timeout: Duration,
    /// Default bound on each correlated request.
    pub request_timeout: Duration,
    /// Delay imposed on sends immediately after entering `Ready`: the
    /// device needs a moment to apply newly granted permissions, and a
    /// request racing that window gets a spurious permission error.
    pub settle_delay: Duration,
    /// Discovery probe settings.
    pub discovery: DiscoveryConfig,
    /// Credential file location; `None` means the platform default.
    pub credentials_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_port: 3000,
            secure_command_port: 3001,
            default_transport_mode: TransportMode::Plain,
            registration_timeout: Duration::from_secs(5),
            pairing_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(250),
            discovery: DiscoveryConfig::default(),
            credentials_path: None,
        }
    }
}
