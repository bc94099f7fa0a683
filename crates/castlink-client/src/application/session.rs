//! The connection & pairing state machine and the public client handle.
//!
//! One [`CastClient`] owns at most one logical session to one device:
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──┬─(credential)──▶ SilentAuthPending ──registered──▶ Ready
//!                                  └─(no credential)─▶ ... challenge ──▶ AwaitingPin
//!                                                                            │
//!                                                        pair(pin) ──registered──▶ Ready
//! ```
//!
//! `Failed` is reachable from every non-terminal state (timer expiry,
//! rejection, transport loss) and `Idle` from `Ready`/`Failed` via
//! explicit [`CastClient::disconnect`].
//!
//! Two design rules from hard-won lessons in this problem space:
//!
//! - **No polling.** Registration and pairing completion are single-shot
//!   `oneshot` signals written exactly once by the frame-dispatch task and
//!   awaited exactly once by the caller.
//! - **One waiter per leg, check-and-set.** The session holds at most one
//!   registration waiter and one pairing waiter; a concurrent `connect`
//!   or `pair` that would need an occupied slot fails fast instead of
//!   silently replacing the first caller's waiter.
//!
//! `connect` never blocks on a human: on first contact it returns
//! [`ConnectStatus::WaitingForPin`] as soon as the device issues its
//! pairing challenge, and the interactive leg completes in a separate
//! [`CastClient::pair`] call.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use castlink_core::{keys, uris, CorrelationIdGenerator, Frame, FrameType, PointerEvent};

use crate::application::correlator::PendingTable;
use crate::application::ClientError;
use crate::config::ClientConfig;
use crate::infrastructure::network::discovery::{self, DiscoveredDevice};
use crate::infrastructure::network::input_channel::InputChannel;
use crate::infrastructure::network::transport::{
    command_url, FrameTransport, TransportEvent,
};
use crate::infrastructure::storage::credentials::{
    now_epoch_secs, Credential, CredentialStore, TransportMode,
};

// ── Session state ─────────────────────────────────────────────────────────────

/// State of the one logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; nothing in flight.
    Idle,
    /// Transport opening / registration frame not yet answered.
    Connecting,
    /// Registration with a stored secret sent; confirmation timer armed.
    SilentAuthPending,
    /// Device issued a pairing challenge; waiting for `pair(pin)`.
    AwaitingPin,
    /// Registered; requests may be sent.
    Ready,
    /// Registration failed or the transport dropped.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::SilentAuthPending => "silent-auth-pending",
            SessionState::AwaitingPin => "awaiting-pin",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a successful [`CastClient::connect`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Silent re-authentication succeeded; the session is ready.
    Connected,
    /// First contact: the device wants a PIN. Call [`CastClient::pair`].
    WaitingForPin,
}

/// What the dispatch task tells a waiting `connect`/`pair` caller.
#[derive(Debug)]
enum RegistrationSignal {
    /// Registration confirmed; `secret_token` is the device-issued secret
    /// when the confirmation carried one.
    Accepted { secret_token: Option<String> },
    /// The device issued a pairing challenge.
    Challenge,
    /// The device explicitly refused.
    Rejected(String),
    /// The transport dropped mid-flow.
    ConnectionClosed,
}

/// Mutable session fields shared with the dispatch task.
///
/// `generation` increments on every `connect`/`disconnect`; a dispatch
/// task spawned for an older generation must never mutate newer state.
struct SessionShared {
    state: SessionState,
    generation: u64,
    address: Option<String>,
    transport_mode: TransportMode,
    /// Transient copy of the credential secret for this session only; the
    /// durable copy is owned by the credential store.
    secret_token: Option<String>,
    register_id: Option<String>,
    pin_request_id: Option<String>,
    registration_waiter: Option<oneshot::Sender<RegistrationSignal>>,
    pairing_waiter: Option<oneshot::Sender<RegistrationSignal>>,
    ready_since: Option<Instant>,
    registered_at: Option<SystemTime>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            address: None,
            transport_mode: TransportMode::Plain,
            secret_token: None,
            register_id: None,
            pin_request_id: None,
            registration_waiter: None,
            pairing_waiter: None,
            ready_since: None,
            registered_at: None,
        }
    }

    /// Drops all per-session fields, keeping state and generation alone.
    fn clear_session_fields(&mut self) {
        self.address = None;
        self.secret_token = None;
        self.register_id = None;
        self.pin_request_id = None;
        self.registration_waiter = None;
        self.pairing_waiter = None;
        self.ready_since = None;
        self.registered_at = None;
    }
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Stateful control client for one CastLink device at a time.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use castlink_client::{CastClient, ClientConfig, ConnectStatus};
///
/// # async fn example() -> Result<(), castlink_client::ClientError> {
/// let client = CastClient::new(ClientConfig::default())?;
///
/// let devices = client.discover(Duration::from_secs(1)).await?;
/// println!("found {} device(s)", devices.len());
///
/// match client.connect(None).await? {
///     ConnectStatus::Connected => {}
///     ConnectStatus::WaitingForPin => {
///         // Show the prompt, read the PIN from the user, then:
///         client.pair("123456").await?;
///     }
/// }
///
/// let volume = client.send("cast://audio/volume", None).await?;
/// println!("volume: {volume}");
/// # Ok(())
/// # }
/// ```
pub struct CastClient {
    config: ClientConfig,
    store: CredentialStore,
    ids: CorrelationIdGenerator,
    shared: Arc<Mutex<SessionShared>>,
    pending: PendingTable,
    transport: AsyncMutex<Option<FrameTransport>>,
    input: AsyncMutex<Option<InputChannel>>,
    last_discovered: Mutex<Vec<DiscoveredDevice>>,
}

impl CastClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] when no credential path was
    /// configured and the platform default location cannot be determined.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let store = match &config.credentials_path {
            Some(path) => CredentialStore::new(path.clone()),
            None => CredentialStore::at_default_location()?,
        };
        Ok(Self {
            config,
            store,
            ids: CorrelationIdGenerator::new(),
            shared: Arc::new(Mutex::new(SessionShared::new())),
            pending: PendingTable::new(),
            transport: AsyncMutex::new(None),
            input: AsyncMutex::new(None),
            last_discovered: Mutex::new(Vec::new()),
        })
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.lock_shared().state
    }

    /// Number of requests currently awaiting settlement.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Stored credentials, most recently used first.
    pub fn credentials(&self) -> Vec<Credential> {
        self.store.all()
    }

    /// Devices found by the most recent [`discover`](Self::discover) run.
    pub fn last_discovered(&self) -> Vec<DiscoveredDevice> {
        self.last_discovered
            .lock()
            .expect("discovery cache mutex poisoned")
            .clone()
    }

    /// Permanently removes the stored credential for `address`.
    ///
    /// Returns `true` when a record existed. The next `connect` to that
    /// address re-enters interactive pairing.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] on write failure.
    pub fn forget(&self, address: &str) -> Result<bool, ClientError> {
        Ok(self.store.forget(address)?)
    }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Runs one time-bounded discovery probe and caches the result.
    ///
    /// The first device found becomes the default `connect` target when
    /// neither an explicit address nor a stored credential provides one.
    /// Discovery uses its own short-lived socket and may run while a
    /// session is live.
    ///
    /// # Errors
    ///
    /// Only socket-level failures; zero responders is `Ok(vec![])`.
    pub async fn discover(
        &self,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredDevice>, ClientError> {
        let devices = discovery::discover(&self.config.discovery, timeout).await?;
        *self
            .last_discovered
            .lock()
            .expect("discovery cache mutex poisoned") = devices.clone();
        Ok(devices)
    }

    // ── Connect / pair / disconnect ───────────────────────────────────────────

    /// Opens a session to `target` (or the resolved default) and performs
    /// registration.
    ///
    /// With a stored credential this is silent re-authentication and
    /// resolves [`ConnectStatus::Connected`] strictly before the
    /// registration timer, or fails with a registration timeout at the
    /// boundary (the credential is kept — it may simply be stale). Without
    /// one, the call returns [`ConnectStatus::WaitingForPin`] as soon as
    /// the device issues its challenge; complete the flow with
    /// [`pair`](Self::pair).
    ///
    /// Any previous session — ready or failed — is torn down first and its
    /// outstanding requests settle with [`ClientError::TransportClosed`].
    ///
    /// # Errors
    ///
    /// Fails fast with [`ClientError::AlreadyConnecting`] /
    /// [`ClientError::PairingInProgress`] while another flow is in flight
    /// on this session, and with [`ClientError::NoTarget`] when no address
    /// can be resolved.
    pub async fn connect(&self, target: Option<&str>) -> Result<ConnectStatus, ClientError> {
        // Claim the session or fail fast — never clobber an in-flight flow.
        let generation = {
            let mut shared = self.lock_shared();
            match shared.state {
                SessionState::Connecting | SessionState::SilentAuthPending => {
                    return Err(ClientError::AlreadyConnecting);
                }
                SessionState::AwaitingPin => return Err(ClientError::PairingInProgress),
                SessionState::Idle | SessionState::Ready | SessionState::Failed => {}
            }
            shared.generation += 1;
            shared.state = SessionState::Connecting;
            shared.clear_session_fields();
            shared.generation
        };

        // Tear down the previous session: settle its pending requests
        // first, so a pointer send parked on one of them releases the
        // input lock before we take it.
        let leftover = self.pending.fail_all(|| ClientError::TransportClosed);
        if leftover > 0 {
            debug!(leftover, "settled requests from previous session");
        }
        *self.transport.lock().await = None;
        *self.input.lock().await = None;

        let address = match self.resolve_target(target) {
            Ok(address) => address,
            Err(e) => {
                self.fail_session(generation);
                return Err(e);
            }
        };
        let credential = self.store.lookup(&address);
        let mode = credential
            .as_ref()
            .map(|c| c.transport_mode)
            .unwrap_or(self.config.default_transport_mode);

        info!(%address, ?mode, silent = credential.is_some(), "connecting");

        let url = command_url(
            &address,
            mode,
            self.config.command_port,
            self.config.secure_command_port,
        );
        let (transport, events) = match FrameTransport::connect(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                self.fail_session(generation);
                return Err(ClientError::Transport(e));
            }
        };
        *self.transport.lock().await = Some(transport);

        tokio::spawn(dispatch_loop(
            events,
            Arc::clone(&self.shared),
            self.pending.clone(),
            generation,
        ));

        // Send the registration frame and arm the single-shot waiter.
        let register_id = self.ids.next();
        let (signal_tx, signal_rx) = oneshot::channel();
        {
            let mut shared = self.lock_shared();
            if shared.generation != generation {
                return Err(ClientError::TransportClosed);
            }
            shared.address = Some(address.clone());
            shared.transport_mode = mode;
            shared.register_id = Some(register_id.clone());
            shared.registration_waiter = Some(signal_tx);
            if let Some(credential) = &credential {
                shared.secret_token = Some(credential.secret_token.clone());
                shared.state = SessionState::SilentAuthPending;
            }
        }
        let register =
            Frame::register(&register_id, credential.as_ref().map(|c| c.secret_token.as_str()));
        if let Err(e) = self.send_frame(register).await {
            self.fail_session(generation);
            return Err(e);
        }

        // Await the dispatch task's signal under the registration timer.
        let after = self.config.registration_timeout;
        match tokio::time::timeout(after, signal_rx).await {
            Err(_elapsed) => {
                // Timer expiry with no confirmation. The stored credential
                // is NOT deleted — the device may simply be slow or stale.
                if let Some(mut shared) = self.lock_current(generation) {
                    shared.state = SessionState::Failed;
                    shared.registration_waiter = None;
                }
                warn!(%address, "registration timeout");
                Err(ClientError::Timeout { operation: "registration", after })
            }
            Ok(Err(_dropped)) => Err(ClientError::TransportClosed),
            Ok(Ok(RegistrationSignal::Accepted { secret_token })) => {
                let secret = secret_token.or(credential.map(|c| c.secret_token));
                let Some(secret) = secret else {
                    self.fail_session(generation);
                    return Err(ClientError::Rejected(
                        "registration confirmed without a secret token".to_string(),
                    ));
                };
                self.enter_ready(generation, &address, &secret, mode)?;
                Ok(ConnectStatus::Connected)
            }
            Ok(Ok(RegistrationSignal::Challenge)) => {
                if let Some(mut shared) = self.lock_current(generation) {
                    shared.state = SessionState::AwaitingPin;
                }
                info!(%address, "waiting for PIN");
                Ok(ConnectStatus::WaitingForPin)
            }
            Ok(Ok(RegistrationSignal::Rejected(message))) => {
                self.fail_session(generation);
                Err(ClientError::Rejected(message))
            }
            Ok(Ok(RegistrationSignal::ConnectionClosed)) => Err(ClientError::TransportClosed),
        }
    }

    /// Completes interactive pairing by submitting the PIN shown on the
    /// device.
    ///
    /// Only valid in `AwaitingPin`. On success the newly issued secret is
    /// persisted for the address (re-pairing overwrites, never duplicates)
    /// and the session becomes ready. Rejection and timeout leave the
    /// session in `AwaitingPin` so a corrected PIN can be submitted; no
    /// credential is written.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotPairing`] outside `AwaitingPin`,
    /// [`ClientError::PairingInProgress`] when another `pair` call already
    /// holds the waiter slot, [`ClientError::Rejected`] on explicit
    /// refusal, [`ClientError::Timeout`] on submission timeout.
    pub async fn pair(&self, pin: &str) -> Result<(), ClientError> {
        let (signal_tx, signal_rx) = oneshot::channel();
        let (generation, pin_id, address, mode) = {
            let mut shared = self.lock_shared();
            if shared.state != SessionState::AwaitingPin {
                return Err(ClientError::NotPairing);
            }
            // Check-and-set: one pairing waiter, ever.
            if shared.pairing_waiter.is_some() {
                return Err(ClientError::PairingInProgress);
            }
            let pin_id = self.ids.next();
            shared.pairing_waiter = Some(signal_tx);
            shared.pin_request_id = Some(pin_id.clone());
            let address = shared.address.clone().unwrap_or_default();
            (shared.generation, pin_id, address, shared.transport_mode)
        };

        let submit = Frame::request(&pin_id, uris::SUBMIT_PIN, Some(json!({ (keys::PIN): pin })));
        if let Err(e) = self.send_frame(submit).await {
            if let Some(mut shared) = self.lock_current(generation) {
                shared.pairing_waiter = None;
                shared.pin_request_id = None;
            }
            return Err(e);
        }

        let after = self.config.pairing_timeout;
        match tokio::time::timeout(after, signal_rx).await {
            Err(_elapsed) => {
                // Submission timer — distinct from the registration timer.
                // The session stays in AwaitingPin; the caller may retry.
                if let Some(mut shared) = self.lock_current(generation) {
                    shared.pairing_waiter = None;
                    shared.pin_request_id = None;
                }
                warn!(%address, "PIN submission timeout");
                Err(ClientError::Timeout { operation: "pairing", after })
            }
            Ok(Err(_dropped)) => Err(ClientError::TransportClosed),
            Ok(Ok(RegistrationSignal::Accepted { secret_token })) => {
                let Some(secret) = secret_token else {
                    if let Some(mut shared) = self.lock_current(generation) {
                        shared.pin_request_id = None;
                    }
                    return Err(ClientError::Rejected(
                        "pairing confirmed without a secret token".to_string(),
                    ));
                };
                self.enter_ready(generation, &address, &secret, mode)?;
                info!(%address, "paired");
                Ok(())
            }
            Ok(Ok(RegistrationSignal::Rejected(message))) => {
                // No credential written; AwaitingPin is kept for a retry.
                if let Some(mut shared) = self.lock_current(generation) {
                    shared.pin_request_id = None;
                }
                warn!(%address, "pairing rejected: {message}");
                Err(ClientError::Rejected(message))
            }
            Ok(Ok(RegistrationSignal::Challenge)) => {
                // A second challenge mid-pairing is a device protocol bug.
                Err(ClientError::Rejected("unexpected pairing challenge".to_string()))
            }
            Ok(Ok(RegistrationSignal::ConnectionClosed)) => Err(ClientError::TransportClosed),
        }
    }

    /// Closes the session and returns to `Idle`.
    ///
    /// Outstanding requests settle with [`ClientError::TransportClosed`].
    /// Persisted credentials are untouched.
    pub async fn disconnect(&self) {
        {
            let mut shared = self.lock_shared();
            shared.generation += 1;
            shared.state = SessionState::Idle;
            shared.clear_session_fields();
        }
        // Settle before locking: a pointer send parked on a request must
        // release the input lock before we can take it.
        let leftover = self.pending.fail_all(|| ClientError::TransportClosed);
        if leftover > 0 {
            debug!(leftover, "settled requests on disconnect");
        }
        *self.transport.lock().await = None;
        *self.input.lock().await = None;
        info!("disconnected");
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    /// Sends a correlated request and resolves with the device's response
    /// payload.
    ///
    /// Requires a ready session; otherwise fails immediately with
    /// [`ClientError::NotConnected`] and no pending entry is created.
    /// Multiple sends may be outstanding at once; responses match by
    /// correlation id, not send order. The only early settlements are the
    /// per-request timer and transport closure — there is no cancel and no
    /// retry.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`], [`ClientError::Timeout`],
    /// [`ClientError::Rejected`] (device `error` frame), or
    /// [`ClientError::TransportClosed`].
    pub async fn send(&self, uri: &str, payload: Option<Value>) -> Result<Value, ClientError> {
        // Settling delay: a request racing the permission grant right
        // after Ready gets a spurious denial, so the first sends wait out
        // the remainder of the window.
        let wait = {
            let shared = self.lock_shared();
            if shared.state != SessionState::Ready {
                return Err(ClientError::NotConnected);
            }
            shared
                .ready_since
                .map(|t| self.config.settle_delay.saturating_sub(t.elapsed()))
                .unwrap_or_default()
        };
        if !wait.is_zero() {
            debug!(?wait, "settling delay before send");
            tokio::time::sleep(wait).await;
            if self.lock_shared().state != SessionState::Ready {
                return Err(ClientError::NotConnected);
            }
        }

        let id = self.ids.next();
        let receiver = self.pending.insert(id.clone(), self.config.request_timeout);
        let frame = Frame::request(&id, uri, payload);
        if let Err(e) = self.send_frame(frame).await {
            // Never leave the entry dangling behind a failed write.
            self.pending.settle(&id, Err(ClientError::TransportClosed));
            return Err(e);
        }

        match receiver.await {
            Ok(result) => result,
            Err(_dropped) => Err(ClientError::TransportClosed),
        }
    }

    // ── Pointer input channel ─────────────────────────────────────────────────

    /// Sends one raw event on the pointer input channel, opening the
    /// channel on first use.
    ///
    /// The channel shares the session's address and transport mode (its
    /// endpoint is issued by the device over the command path) and is
    /// fire-and-forget: no correlation, no reply. A dead channel is
    /// dropped and reopened on the next call.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a ready session;
    /// [`ClientError::TransportClosed`] when the channel died mid-send.
    pub async fn send_pointer(&self, event: PointerEvent) -> Result<(), ClientError> {
        let mut input = self.input.lock().await;
        if input.is_none() {
            let reply = self.send(uris::POINTER_SOCKET, None).await?;
            let path = reply
                .get(keys::SOCKET_PATH)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ClientError::Rejected("pointer socket response missing socket-path".to_string())
                })?;
            let channel = InputChannel::connect(path).await.map_err(ClientError::Transport)?;
            *input = Some(channel);
        }
        let Some(channel) = input.as_ref() else {
            return Err(ClientError::NotConnected);
        };
        if channel.send(event).await.is_err() {
            // Reopen lazily on the next call.
            *input = None;
            return Err(ClientError::TransportClosed);
        }
        Ok(())
    }

    /// Sends a named remote-control button press on the pointer channel.
    pub async fn button(&self, name: &str) -> Result<(), ClientError> {
        self.send_pointer(PointerEvent::Button { name: name.to_string() }).await
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Resolution order: explicit address, else most recently used
    /// credential, else the most recent discovery's first device.
    fn resolve_target(&self, explicit: Option<&str>) -> Result<String, ClientError> {
        if let Some(address) = explicit {
            return Ok(address.to_string());
        }
        if let Some(credential) = self.store.all().into_iter().next() {
            debug!(address = %credential.address, "target from credential store");
            return Ok(credential.address);
        }
        if let Some(device) = self.last_discovered().into_iter().next() {
            debug!(address = %device.address, "target from discovery cache");
            return Ok(device.address.to_string());
        }
        Err(ClientError::NoTarget)
    }

    /// Marks the session ready and persists/refreshes the credential.
    fn enter_ready(
        &self,
        generation: u64,
        address: &str,
        secret: &str,
        mode: TransportMode,
    ) -> Result<(), ClientError> {
        let display_name = self
            .store
            .lookup(address)
            .and_then(|c| c.display_name)
            .or_else(|| {
                self.last_discovered()
                    .into_iter()
                    .find(|d| d.address.to_string() == address)
                    .and_then(|d| d.friendly_name)
            });
        self.store.upsert(Credential {
            address: address.to_string(),
            secret_token: secret.to_string(),
            display_name,
            transport_mode: mode,
            last_used_at: now_epoch_secs(),
        })?;

        let mut shared = self.lock_shared();
        if shared.generation != generation {
            return Err(ClientError::TransportClosed);
        }
        shared.state = SessionState::Ready;
        shared.secret_token = Some(secret.to_string());
        shared.pin_request_id = None;
        shared.ready_since = Some(Instant::now());
        shared.registered_at = Some(SystemTime::now());
        info!(%address, "session ready");
        Ok(())
    }

    /// Moves the session to `Failed` unless a newer session took over.
    fn fail_session(&self, generation: u64) {
        if let Some(mut shared) = self.lock_current(generation) {
            shared.state = SessionState::Failed;
            shared.registration_waiter = None;
            shared.pairing_waiter = None;
        }
    }

    async fn send_frame(&self, frame: Frame) -> Result<(), ClientError> {
        let guard = self.transport.lock().await;
        match guard.as_ref() {
            Some(transport) => {
                transport.send(frame).await.map_err(|_| ClientError::TransportClosed)
            }
            None => Err(ClientError::NotConnected),
        }
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, SessionShared> {
        self.shared.lock().expect("session mutex poisoned")
    }

    /// Locks the shared state only if `generation` is still current.
    fn lock_current(
        &self,
        generation: u64,
    ) -> Option<std::sync::MutexGuard<'_, SessionShared>> {
        let shared = self.lock_shared();
        (shared.generation == generation).then_some(shared)
    }
}

// ── Frame dispatch ────────────────────────────────────────────────────────────

/// Consumes transport events for one session generation.
///
/// Correlated replies settle their pending entry; everything else —
/// registration confirmations, pairing challenges, unsolicited frames —
/// is routed to the session handler. This task is the *only* writer of the
/// registration/pairing completion signals.
async fn dispatch_loop(
    mut events: mpsc::Receiver<TransportEvent>,
    shared: Arc<Mutex<SessionShared>>,
    pending: PendingTable,
    generation: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Frame(frame) => {
                if frame.is_reply() {
                    if let Some(id) = frame.id.as_deref() {
                        let settled = match frame.frame_type {
                            FrameType::Response => pending
                                .settle(id, Ok(frame.payload.clone().unwrap_or(Value::Null))),
                            FrameType::Error => pending.settle(
                                id,
                                Err(ClientError::Rejected(
                                    frame
                                        .error
                                        .clone()
                                        .unwrap_or_else(|| "unspecified device error".to_string()),
                                )),
                            ),
                            _ => false,
                        };
                        if settled {
                            continue;
                        }
                    }
                }
                handle_session_frame(&shared, frame, generation);
            }
            TransportEvent::Closed => {
                on_transport_closed(&shared, &pending, generation);
                break;
            }
        }
    }
    debug!(generation, "dispatch loop ended");
}

/// Handles frames that did not match the pending table: the registration
/// and pairing flow, plus unsolicited device traffic.
fn handle_session_frame(shared: &Arc<Mutex<SessionShared>>, frame: Frame, generation: u64) {
    let mut shared = shared.lock().expect("session mutex poisoned");
    if shared.generation != generation {
        debug!("frame for a stale session generation (ignored)");
        return;
    }

    let is_register_reply = frame.id.is_some() && frame.id == shared.register_id;
    let is_pin_reply = frame.id.is_some() && frame.id == shared.pin_request_id;

    match frame.frame_type {
        FrameType::Registered if is_register_reply => {
            let secret_token = frame.secret_token().map(str::to_string);
            shared.register_id = None;
            // The confirmation completes whichever leg is waiting: the
            // pairing leg after a PIN submission, else the silent leg.
            let waiter = shared
                .pairing_waiter
                .take()
                .or_else(|| shared.registration_waiter.take());
            match waiter {
                Some(tx) => {
                    let _ = tx.send(RegistrationSignal::Accepted { secret_token });
                }
                None => warn!("registration confirmed but nobody is waiting"),
            }
        }
        FrameType::Response if is_register_reply => {
            if frame.pairing_type().is_some() {
                match shared.registration_waiter.take() {
                    Some(tx) => {
                        let _ = tx.send(RegistrationSignal::Challenge);
                    }
                    None => warn!("pairing challenge but nobody is waiting"),
                }
            } else {
                debug!("registration response without a challenge (ignored)");
            }
        }
        FrameType::Error if is_register_reply || is_pin_reply => {
            let message = frame
                .error
                .unwrap_or_else(|| "registration refused".to_string());
            let waiter = if is_pin_reply {
                shared.pairing_waiter.take()
            } else {
                shared
                    .registration_waiter
                    .take()
                    .or_else(|| shared.pairing_waiter.take())
            };
            match waiter {
                Some(tx) => {
                    let _ = tx.send(RegistrationSignal::Rejected(message));
                }
                None => warn!("device refusal but nobody is waiting: {message}"),
            }
        }
        _ => {
            debug!(frame_type = ?frame.frame_type, id = ?frame.id, "unsolicited frame (ignored)");
        }
    }
}

/// Transport loss: force-settle every outstanding request and fail the
/// session, clearing the in-memory secret so later sends fail fast with
/// "not connected" instead of riding a stale session.
fn on_transport_closed(
    shared: &Arc<Mutex<SessionShared>>,
    pending: &PendingTable,
    generation: u64,
) {
    let mut shared = shared.lock().expect("session mutex poisoned");
    if shared.generation != generation {
        // A newer connect/disconnect already tore this session down; its
        // pending table is not ours to touch.
        return;
    }
    let outstanding = pending.fail_all(|| ClientError::TransportClosed);
    if outstanding > 0 {
        warn!(outstanding, "transport closed with requests in flight");
    }
    if shared.state != SessionState::Idle {
        shared.state = SessionState::Failed;
    }
    shared.secret_token = None;
    shared.ready_since = None;
    for waiter in [shared.registration_waiter.take(), shared.pairing_waiter.take()]
        .into_iter()
        .flatten()
    {
        let _ = waiter.send(RegistrationSignal::ConnectionClosed);
    }
    warn!("transport closed; session failed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
