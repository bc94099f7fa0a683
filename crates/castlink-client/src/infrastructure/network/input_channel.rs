//! The fire-and-forget pointer input channel.
//!
//! Button and pointer events go over a second WebSocket, separate from the
//! command transport: input must never queue behind slow command replies,
//! and the device sends nothing back on this path, so there is no
//! correlation table at all.
//!
//! The endpoint URL is not fixed — the session requests it from the device
//! over the command path ([`castlink_core::uris::POINTER_SOCKET`]) and
//! opens this channel lazily on first input send.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info};

use castlink_core::PointerEvent;

use crate::infrastructure::network::transport::TransportError;

/// Handle to a live pointer input channel.
///
/// Dropping the handle closes the outbound queue; the writer task sends a
/// WebSocket Close and exits.
pub struct InputChannel {
    outbound: mpsc::Sender<PointerEvent>,
}

impl InputChannel {
    /// Connects to the device-provided input endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the WebSocket handshake
    /// fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|source| TransportError::Connect { url: url.to_string(), source })?;
        info!(%url, "pointer input channel connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<PointerEvent>(128);

        // Writer task: events out, nothing awaited back.
        tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("failed to encode pointer event: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                    debug!("pointer channel write failed: {e}");
                    break;
                }
            }
            let _ = ws_tx.send(WsMessage::Close(None)).await;
            debug!("pointer channel writer stopped");
        });

        // Drain task: the device is not expected to send anything, but the
        // connection stays healthy only if close/ping frames are consumed.
        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(other) => debug!("pointer channel inbound frame ignored: {other:?}"),
                }
            }
            debug!("pointer channel reader stopped");
        });

        Ok(Self { outbound: outbound_tx })
    }

    /// Queues one event. Fire-and-forget: success means the event was
    /// handed to the writer task, not that the device acted on it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the writer task has exited.
    pub async fn send(&self, event: PointerEvent) -> Result<(), TransportError> {
        self.outbound.send(event).await.map_err(|_| TransportError::Closed)
    }
}
