//! In-process fake CastLink device for integration tests.
//!
//! Speaks the real wire protocol over real sockets: a command WebSocket
//! endpoint that implements registration, PIN pairing, and configurable
//! request handling, plus a pointer input endpoint that records received
//! events. Tests configure per-request behavior with a [`RequestHandler`]
//! closure and can hard-drop every live connection to exercise transport
//! loss.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use castlink_core::{decode_frame, encode_frame, keys, uris, Frame, FrameType, PointerEvent};

/// The PIN the fake device accepts.
pub const DEVICE_PIN: &str = "123456";

/// What the fake device does with one command request.
#[derive(Clone)]
pub enum DeviceReply {
    /// Send a `response` frame with this payload.
    Respond(Value),
    /// Send the `response` after a delay (for out-of-order delivery).
    RespondAfter(Value, Duration),
    /// Send an `error` frame with this message.
    Error(String),
    /// Never answer.
    Silent,
}

/// Per-request behavior hook: `(uri, payload) -> reply`.
pub type RequestHandler = Arc<dyn Fn(&str, Option<&Value>) -> DeviceReply + Send + Sync>;

/// A handler that answers every request with an empty object.
pub fn ack_everything() -> RequestHandler {
    Arc::new(|_uri, _payload| DeviceReply::Respond(json!({})))
}

/// A handler that never answers anything.
pub fn answer_nothing() -> RequestHandler {
    Arc::new(|_uri, _payload| DeviceReply::Silent)
}

/// Handle to a running fake device.
pub struct FakeDevice {
    /// Port of the command WebSocket endpoint.
    pub command_port: u16,
    /// Port of the pointer input WebSocket endpoint.
    pub input_port: u16,
    /// Secrets the device currently considers valid.
    pub secrets: Arc<Mutex<HashSet<String>>>,
    /// Pointer events received on the input endpoint, in arrival order.
    pub input_events: Arc<Mutex<Vec<PointerEvent>>>,
    close_tx: broadcast::Sender<()>,
}

impl FakeDevice {
    /// Spawns a device that answers registration normally and handles
    /// other requests with `handler`.
    pub async fn spawn(handler: RequestHandler) -> Self {
        Self::spawn_with(handler, true).await
    }

    /// Spawns a device; with `answer_register = false` it accepts the
    /// connection but never answers `register` frames (registration
    /// timeout behavior).
    pub async fn spawn_with(handler: RequestHandler, answer_register: bool) -> Self {
        let command_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind command");
        let input_listener = TcpListener::bind("127.0.0.1:0").await.expect("bind input");
        let command_port = command_listener.local_addr().expect("addr").port();
        let input_port = input_listener.local_addr().expect("addr").port();

        let secrets: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let input_events: Arc<Mutex<Vec<PointerEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let (close_tx, _) = broadcast::channel(4);

        // Command accept loop.
        {
            let secrets = Arc::clone(&secrets);
            let close_tx = close_tx.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _peer)) = command_listener.accept().await else { return };
                    let handler = Arc::clone(&handler);
                    let secrets = Arc::clone(&secrets);
                    let close_rx = close_tx.subscribe();
                    tokio::spawn(handle_command_connection(
                        stream,
                        handler,
                        secrets,
                        answer_register,
                        input_port,
                        close_rx,
                    ));
                }
            });
        }

        // Input accept loop.
        {
            let input_events = Arc::clone(&input_events);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _peer)) = input_listener.accept().await else { return };
                    let input_events = Arc::clone(&input_events);
                    tokio::spawn(handle_input_connection(stream, input_events));
                }
            });
        }

        Self { command_port, input_port, secrets, input_events, close_tx }
    }

    /// Registers `secret` as already valid (a previously paired client).
    pub fn known_secret(&self, secret: &str) {
        self.secrets.lock().expect("secrets").insert(secret.to_string());
    }

    /// Hard-drops every live command connection without close frames.
    pub fn drop_connections(&self) {
        let _ = self.close_tx.send(());
    }
}

/// One command connection: registration, pairing, then request handling.
async fn handle_command_connection(
    stream: TcpStream,
    handler: RequestHandler,
    secrets: Arc<Mutex<HashSet<String>>>,
    answer_register: bool,
    input_port: u16,
    mut close_rx: broadcast::Receiver<()>,
) {
    let Ok(ws) = accept_async(stream).await else { return };
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Replies funnel through one channel so delayed responses can be
    // spawned without sharing the sink.
    let (reply_tx, mut reply_rx) = mpsc::channel::<Frame>(64);
    let writer = tokio::spawn(async move {
        while let Some(frame) = reply_rx.recv().await {
            let Ok(text) = encode_frame(&frame) else { continue };
            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                return;
            }
        }
    });

    // Pending pairing state for this connection.
    let mut register_id: Option<String> = None;

    loop {
        tokio::select! {
            _ = close_rx.recv() => break, // hard drop, no close frame
            message = ws_rx.next() => {
                let frame = match message {
                    Some(Ok(WsMessage::Text(text))) => match decode_frame(&text) {
                        Ok(frame) => frame,
                        Err(_) => continue,
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                handle_frame(
                    frame,
                    &handler,
                    &secrets,
                    answer_register,
                    input_port,
                    &mut register_id,
                    &reply_tx,
                );
            }
        }
    }
    writer.abort();
}

fn handle_frame(
    frame: Frame,
    handler: &RequestHandler,
    secrets: &Arc<Mutex<HashSet<String>>>,
    answer_register: bool,
    input_port: u16,
    register_id: &mut Option<String>,
    reply_tx: &mpsc::Sender<Frame>,
) {
    let id = frame.id.clone().unwrap_or_default();
    match frame.frame_type {
        FrameType::Register => {
            if !answer_register {
                return;
            }
            let offered = frame
                .payload
                .as_ref()
                .and_then(|p| p.get(keys::SECRET_TOKEN))
                .and_then(Value::as_str)
                .map(str::to_string);
            match offered {
                Some(secret) if secrets.lock().expect("secrets").contains(&secret) => {
                    let _ = reply_tx.try_send(Frame::registered(&id, &secret));
                }
                _ => {
                    // Unknown or absent secret: challenge for a PIN.
                    *register_id = Some(id.clone());
                    let _ = reply_tx
                        .try_send(Frame::response(&id, json!({ (keys::PAIRING_TYPE): "PIN" })));
                }
            }
        }
        FrameType::Request if frame.uri.as_deref() == Some(uris::SUBMIT_PIN) => {
            let pin = frame
                .payload
                .as_ref()
                .and_then(|p| p.get(keys::PIN))
                .and_then(Value::as_str);
            match (pin, register_id.take()) {
                (Some(pin), Some(reg_id)) if pin == DEVICE_PIN => {
                    let secret = Uuid::new_v4().simple().to_string();
                    secrets.lock().expect("secrets").insert(secret.clone());
                    let _ = reply_tx.try_send(Frame::registered(&reg_id, &secret));
                }
                (_, reg_id) => {
                    // Wrong PIN: keep the pairing slot open for a retry.
                    *register_id = reg_id;
                    let _ = reply_tx.try_send(Frame::error(&id, "pairing rejected: wrong PIN"));
                }
            }
        }
        FrameType::Request if frame.uri.as_deref() == Some(uris::POINTER_SOCKET) => {
            let _ = reply_tx.try_send(Frame::response(
                &id,
                json!({ (keys::SOCKET_PATH): format!("ws://127.0.0.1:{input_port}/") }),
            ));
        }
        FrameType::Request => {
            let uri = frame.uri.clone().unwrap_or_default();
            match handler(&uri, frame.payload.as_ref()) {
                DeviceReply::Respond(payload) => {
                    let _ = reply_tx.try_send(Frame::response(&id, payload));
                }
                DeviceReply::RespondAfter(payload, delay) => {
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = reply_tx.send(Frame::response(&id, payload)).await;
                    });
                }
                DeviceReply::Error(message) => {
                    let _ = reply_tx.try_send(Frame::error(&id, message));
                }
                DeviceReply::Silent => {}
            }
        }
        _ => {}
    }
}

/// One pointer input connection: record every event, answer nothing.
async fn handle_input_connection(stream: TcpStream, events: Arc<Mutex<Vec<PointerEvent>>>) {
    let Ok(ws) = accept_async(stream).await else { return };
    let (_tx, mut rx) = ws.split();
    while let Some(message) = rx.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                if let Ok(event) = serde_json::from_str::<PointerEvent>(&text) {
                    events.lock().expect("input events").push(event);
                }
            }
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Test-tuned client configuration pointed at a fake device.
pub fn test_config(device: &FakeDevice, credentials_dir: &std::path::Path) -> castlink_client::ClientConfig {
    castlink_client::ClientConfig {
        command_port: device.command_port,
        secure_command_port: device.command_port,
        registration_timeout: Duration::from_millis(500),
        pairing_timeout: Duration::from_millis(500),
        request_timeout: Duration::from_millis(400),
        settle_delay: Duration::from_millis(10),
        credentials_path: Some(credentials_dir.join("credentials.json")),
        ..castlink_client::ClientConfig::default()
    }
}

/// Fresh temp directory for one test's credential file.
pub fn temp_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("castlink_it_{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Best-effort tracing init for debugging failing tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
