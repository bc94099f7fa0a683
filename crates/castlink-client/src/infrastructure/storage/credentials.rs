//! JSON-based credential persistence for paired devices.
//!
//! After a successful pairing the device issues a long-lived secret token;
//! this module stores one record per device address so later sessions can
//! re-authenticate silently. Records live in a single JSON file:
//!
//! - Windows:  `%APPDATA%\CastLink\credentials.json`
//! - Linux:    `~/.config/castlink/credentials.json`
//! - macOS:    `~/Library/Application Support/CastLink/credentials.json`
//!
//! The file is stored in plaintext. Every mutation is a full
//! read-merge-write cycle, so an `upsert` for one address can never drop
//! another address's record under normal single-process use. Concurrent
//! *processes* racing on the file are not protected.
//!
//! A missing or unreadable file is not an error: `lookup` and `all` return
//! empty results and the client degrades to "must pair".

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for credential store write operations.
///
/// Read operations never fail — see the module docs.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing credentials at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The credential set could not be serialized.
    #[error("failed to serialize credentials: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ── Record types ──────────────────────────────────────────────────────────────

/// Which command endpoint a device session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// `ws://` on the plain command port.
    #[default]
    Plain,
    /// `wss://` on the secure command port.
    Secure,
}

/// One persisted pairing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Device network address (IP or hostname) the record is keyed by.
    pub address: String,
    /// Opaque secret issued by the device at pairing time.
    pub secret_token: String,
    /// Display name learned during discovery, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Endpoint flavour this device was paired over.
    #[serde(default)]
    pub transport_mode: TransportMode,
    /// Seconds since the Unix epoch of the last successful registration.
    pub last_used_at: u64,
}

/// On-disk document: a versionable wrapper around the record list.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    credentials: Vec<Credential>,
}

/// Returns the current time as seconds since the Unix epoch.
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Durable, address-keyed store of pairing credentials.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Creates a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store at the platform-appropriate default location.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoPlatformConfigDir`] when the base directory
    /// cannot be determined from the environment.
    pub fn at_default_location() -> Result<Self, StoreError> {
        let dir = platform_config_dir().ok_or(StoreError::NoPlatformConfigDir)?;
        Ok(Self::new(dir.join("credentials.json")))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the credential for `address`, if one is stored.
    pub fn lookup(&self, address: &str) -> Option<Credential> {
        self.read_all().into_iter().find(|c| c.address == address)
    }

    /// Returns every stored credential, most recently used first.
    pub fn all(&self) -> Vec<Credential> {
        let mut records = self.read_all();
        records.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        records
    }

    /// Inserts or replaces the record for `credential.address`.
    ///
    /// Full read-merge-write: every other address's record is re-read from
    /// disk and preserved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the merged set cannot be written back.
    pub fn upsert(&self, credential: Credential) -> Result<(), StoreError> {
        let mut records = self.read_all();
        records.retain(|c| c.address != credential.address);
        records.push(credential);
        self.write_all(records)
    }

    /// Permanently removes the record for `address`.
    ///
    /// Returns `true` when a record was removed, `false` when none existed
    /// (in which case nothing is written).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the remaining set cannot be written back.
    pub fn forget(&self, address: &str) -> Result<bool, StoreError> {
        let mut records = self.read_all();
        let before = records.len();
        records.retain(|c| c.address != address);
        if records.len() == before {
            return Ok(false);
        }
        self.write_all(records)?;
        Ok(true)
    }

    /// Reads the full record set, degrading to empty on any failure.
    fn read_all(&self) -> Vec<Credential> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "credential file unreadable: {e}");
                return Vec::new();
            }
        };
        match serde_json::from_str::<CredentialFile>(&content) {
            Ok(file) => file.credentials,
            Err(e) => {
                warn!(path = %self.path.display(), "credential file malformed: {e}");
                Vec::new()
            }
        }
    }

    fn write_all(&self, credentials: Vec<Credential>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_string_pretty(&CredentialFile { credentials })?;
        std::fs::write(&self.path, content).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "credentials written");
        Ok(())
    }
}

/// Resolves the platform config base directory including the CastLink
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("CastLink"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("castlink"))
    }

    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/CastLink
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("CastLink")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
