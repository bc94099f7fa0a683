//! The persistent command transport: one WebSocket per session.
//!
//! [`FrameTransport::connect`] opens the socket and splits it into two
//! background tasks:
//!
//! - **Writer** – drains an `mpsc` of outbound [`Frame`]s, encodes each
//!   one, and writes it as a text frame. When the outbound channel closes
//!   (the handle was dropped), it sends a WebSocket Close and exits.
//! - **Reader** – decodes inbound text frames and forwards them as
//!   [`TransportEvent::Frame`]; a close frame, EOF, or read error becomes
//!   one final [`TransportEvent::Closed`].
//!
//! A single malformed inbound frame is logged and skipped — the device
//! might interleave valid traffic — but the session owner decides what a
//! `Closed` event means; this layer has no reconnect logic.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};

use castlink_core::{decode_frame, encode_frame, Frame};

use crate::infrastructure::storage::credentials::TransportMode;

/// Error type for the command transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The WebSocket connection could not be established.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: WsError,
    },

    /// The transport is no longer accepting frames.
    #[error("transport closed")]
    Closed,
}

/// Events delivered to the session's dispatch task.
#[derive(Debug)]
pub enum TransportEvent {
    /// A decoded inbound frame.
    Frame(Frame),
    /// The connection ended (close frame, EOF, or read error). Always the
    /// last event for a transport.
    Closed,
}

/// Builds the command endpoint URL for a device address.
pub fn command_url(address: &str, mode: TransportMode, plain_port: u16, secure_port: u16) -> String {
    match mode {
        TransportMode::Plain => format!("ws://{address}:{plain_port}/"),
        TransportMode::Secure => format!("wss://{address}:{secure_port}/"),
    }
}

/// Handle to a live command transport.
///
/// Dropping the handle closes the outbound channel, which makes the writer
/// task send a WebSocket Close and wind the connection down.
pub struct FrameTransport {
    outbound: mpsc::Sender<Frame>,
}

impl FrameTransport {
    /// Connects to `url` and spawns the reader/writer tasks.
    ///
    /// Returns the transport handle and the inbound event receiver. The
    /// receiver yields frames until the connection ends, then exactly one
    /// [`TransportEvent::Closed`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the WebSocket handshake
    /// fails.
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|source| TransportError::Connect { url: url.to_string(), source })?;
        info!(%url, "command transport connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(64);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(128);

        // ── Writer task ───────────────────────────────────────────────────────
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match encode_frame(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("failed to encode outbound frame: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                    debug!("command transport write failed: {e}");
                    break;
                }
            }
            // Outbound channel closed — the handle was dropped. Say goodbye.
            let _ = ws_tx.send(WsMessage::Close(None)).await;
            debug!("command transport writer stopped");
        });

        // ── Reader task ───────────────────────────────────────────────────────
        tokio::spawn(async move {
            loop {
                match ws_rx.next().await {
                    Some(Ok(WsMessage::Text(text))) => match decode_frame(&text) {
                        Ok(frame) => {
                            if event_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                // Dispatch task gone — session torn down.
                                debug!("event channel closed; stopping reader");
                                return;
                            }
                        }
                        Err(e) => warn!("skipping malformed inbound frame: {e}"),
                    },
                    Some(Ok(WsMessage::Binary(_))) => {
                        // The command protocol is text-only.
                        warn!("unexpected binary frame from device (ignored)");
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                        // Protocol-level frames; tungstenite answers pings on write.
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!("device sent close frame");
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    Some(Err(e)) => {
                        debug!("command transport read error: {e}");
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    None => {
                        debug!("command transport stream ended");
                        let _ = event_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                }
            }
        });

        Ok((Self { outbound: outbound_tx }, event_rx))
    }

    /// Queues one frame for sending.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the writer task has exited.
    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound.send(frame).await.map_err(|_| TransportError::Closed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
