//! Network infrastructure: discovery probe, command transport, and the
//! pointer input channel.
//!
//! Three independent sockets with three lifetimes:
//!
//! - [`discovery`] – a short-lived UDP socket per probe; never shares
//!   state with a live session and may run alongside one.
//! - [`transport`] – the persistent command WebSocket; exactly one per
//!   session, owned by the session state machine.
//! - [`input_channel`] – the lazy fire-and-forget pointer WebSocket,
//!   opened on first input send at an endpoint issued by the device.

pub mod discovery;
pub mod input_channel;
pub mod transport;
