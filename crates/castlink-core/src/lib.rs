//! # castlink-core
//!
//! Shared library for CastLink containing the wire frame types, the JSON
//! frame codec, and correlation-identifier generation.
//!
//! This crate is used by the control client and by test harnesses that
//! emulate a device. It has zero dependencies on sockets, OS APIs, or UI
//! frameworks.
//!
//! # Protocol overview
//!
//! A CastLink device exposes a message-oriented WebSocket endpoint. Every
//! message is one JSON object per text frame:
//!
//! - **`protocol::frames`** – The typed [`Frame`] structure (`type`, `id`,
//!   `uri`, `payload`, `error`), the capability manifest sent at
//!   registration, the well-known protocol URIs, and the event type for
//!   the low-level pointer input channel.
//!
//! - **`protocol::codec`** – Encoding a [`Frame`] to a text frame and
//!   decoding text frames back into typed structs, with size limits and
//!   structured errors.
//!
//! - **`protocol::correlation`** – Generation of the correlation
//!   identifiers that match asynchronous responses to the requests that
//!   produced them.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `castlink_core::Frame` instead of `castlink_core::protocol::frames::Frame`.
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError, MAX_FRAME_SIZE};
pub use protocol::correlation::CorrelationIdGenerator;
pub use protocol::frames::{keys, manifest, uris, Frame, FrameType, PointerEvent};
