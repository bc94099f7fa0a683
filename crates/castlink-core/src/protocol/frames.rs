//! All CastLink protocol frame types.
//!
//! A CastLink session speaks one JSON object per WebSocket text frame.
//! Every frame carries a `type` discriminant; all other fields are
//! optional and depend on the frame type:
//!
//! ```json
//! {"type":"register","id":"c4f2a1-1","payload":{"manifest":{...}}}
//! {"type":"registered","id":"c4f2a1-1","payload":{"secret-token":"..."}}
//! {"type":"request","id":"c4f2a1-2","uri":"cast://audio/volume-up"}
//! {"type":"response","id":"c4f2a1-2","payload":{"volume":11}}
//! {"type":"error","id":"c4f2a1-2","error":"403 permission denied"}
//! ```
//!
//! # Registration and pairing frames
//!
//! The `register` frame opens every session. When it carries a previously
//! issued secret token the device replies with `registered` directly
//! (silent re-authentication). When it does not, the device replies with
//! a `response` on the same id whose payload carries `pairing-type` — the
//! pairing challenge — and only sends `registered` once the correct PIN
//! has been submitted to [`uris::SUBMIT_PIN`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ── Well-known URIs ───────────────────────────────────────────────────────────

/// Protocol URIs with meaning to the client itself (as opposed to command
/// URIs, which are opaque strings chosen by the caller).
pub mod uris {
    /// PIN submission during interactive pairing.
    pub const SUBMIT_PIN: &str = "cast://pairing/submit-pin";
    /// Returns the endpoint of the low-level pointer input channel.
    pub const POINTER_SOCKET: &str = "cast://input/pointer-socket";
}

// ── Well-known payload keys ───────────────────────────────────────────────────

/// JSON payload keys shared between client and device.
pub mod keys {
    /// The long-lived secret issued by the device at pairing time.
    pub const SECRET_TOKEN: &str = "secret-token";
    /// Present in a registration `response` payload when the device is
    /// challenging the client to pair (value names the challenge kind).
    pub const PAIRING_TYPE: &str = "pairing-type";
    /// The PIN digits submitted to [`super::uris::SUBMIT_PIN`].
    pub const PIN: &str = "pin";
    /// WebSocket URL of the pointer input channel, returned by
    /// [`super::uris::POINTER_SOCKET`].
    pub const SOCKET_PATH: &str = "socket-path";
}

// ── Capability manifest ───────────────────────────────────────────────────────

/// The fixed capability manifest sent with every `register` frame.
///
/// The device grants or denies each permission at pairing time; the set is
/// fixed for the lifetime of a client build, so re-registration with a
/// stored secret always requests the same permissions it was granted.
pub mod manifest {
    use serde_json::{json, Value};

    /// Manifest schema version.
    pub const MANIFEST_VERSION: u32 = 1;

    /// Permissions requested from the device at registration.
    pub const PERMISSIONS: &[&str] = &[
        "CONTROL_AUDIO",
        "CONTROL_POWER",
        "CONTROL_INPUT_MEDIA",
        "CONTROL_INPUT_POINTER",
        "LAUNCH_APPS",
        "READ_DEVICE_INFO",
        "READ_PLAYBACK_STATE",
    ];

    /// Builds the manifest document embedded in the `register` payload.
    pub fn capability_manifest() -> Value {
        json!({
            "manifest-version": MANIFEST_VERSION,
            "permissions": PERMISSIONS,
        })
    }
}

// ── Frame type discriminant ───────────────────────────────────────────────────

/// The `type` discriminant carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// Client → device: open a session, with or without a stored secret.
    Register,
    /// Client → device: a correlated command request.
    Request,
    /// Device → client: successful reply to a `request` (or the pairing
    /// challenge, when replying to a `register`).
    Response,
    /// Device → client: registration confirmed; payload carries the secret.
    Registered,
    /// Device → client: the request or registration was refused.
    Error,
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One CastLink wire frame.
///
/// Prefer the named constructors ([`Frame::register`], [`Frame::request`],
/// ...) over building the struct literally: each frame type has a fixed
/// shape and the constructors keep that shape in one place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame type discriminant.
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Correlation identifier; echoed back on the matching reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Command URI (requests only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Frame body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Human-readable failure description (error frames only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Frame {
    /// Builds a `register` frame carrying the capability manifest and,
    /// when re-authenticating silently, the stored secret token.
    pub fn register(id: impl Into<String>, secret_token: Option<&str>) -> Self {
        let mut payload = json!({ "manifest": manifest::capability_manifest() });
        if let Some(secret) = secret_token {
            payload[keys::SECRET_TOKEN] = Value::String(secret.to_string());
        }
        Self {
            frame_type: FrameType::Register,
            id: Some(id.into()),
            uri: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// Builds a correlated command `request` frame.
    pub fn request(id: impl Into<String>, uri: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            frame_type: FrameType::Request,
            id: Some(id.into()),
            uri: Some(uri.into()),
            payload,
            error: None,
        }
    }

    /// Builds a `response` frame (device side; used by test harnesses).
    pub fn response(id: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_type: FrameType::Response,
            id: Some(id.into()),
            uri: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// Builds a `registered` frame carrying a newly issued secret
    /// (device side; used by test harnesses).
    pub fn registered(id: impl Into<String>, secret_token: &str) -> Self {
        Self {
            frame_type: FrameType::Registered,
            id: Some(id.into()),
            uri: None,
            payload: Some(json!({ (keys::SECRET_TOKEN): secret_token })),
            error: None,
        }
    }

    /// Builds an `error` frame (device side; used by test harnesses).
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Error,
            id: Some(id.into()),
            uri: None,
            payload: None,
            error: Some(message.into()),
        }
    }

    /// Returns `true` for frames that settle a correlated request:
    /// `response` and `error` frames carrying an id.
    pub fn is_reply(&self) -> bool {
        matches!(self.frame_type, FrameType::Response | FrameType::Error) && self.id.is_some()
    }

    /// Returns the pairing challenge kind when this frame is a pairing
    /// challenge (a `response` whose payload carries `pairing-type`).
    pub fn pairing_type(&self) -> Option<&str> {
        if self.frame_type != FrameType::Response {
            return None;
        }
        self.payload.as_ref()?.get(keys::PAIRING_TYPE)?.as_str()
    }

    /// Returns the secret token carried by a `registered` frame.
    pub fn secret_token(&self) -> Option<&str> {
        if self.frame_type != FrameType::Registered {
            return None;
        }
        self.payload.as_ref()?.get(keys::SECRET_TOKEN)?.as_str()
    }
}

// ── Pointer input channel events ──────────────────────────────────────────────

/// One event on the fire-and-forget pointer input channel.
///
/// The pointer channel is a separate WebSocket carrying raw button and
/// pointer events only. Events have no ids and receive no replies.
///
/// # Serde representation
///
/// ```json
/// {"type":"button","name":"UP"}
/// {"type":"move","dx":4.0,"dy":-2.5,"drag":false}
/// {"type":"click"}
/// {"type":"scroll","dx":0.0,"dy":1.0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PointerEvent {
    /// A named remote-control button (e.g. `"UP"`, `"BACK"`, `"ENTER"`).
    Button { name: String },
    /// Relative pointer movement.
    Move {
        dx: f64,
        dy: f64,
        #[serde(default)]
        drag: bool,
    },
    /// Click at the current pointer position.
    Click,
    /// Scroll wheel movement.
    Scroll { dx: f64, dy: f64 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
