//! CastLink wire protocol: frame types, JSON codec, and correlation ids.

pub mod codec;
pub mod correlation;
pub mod frames;

pub use codec::{decode_frame, encode_frame, ProtocolError};
pub use correlation::CorrelationIdGenerator;
pub use frames::{Frame, FrameType, PointerEvent};
