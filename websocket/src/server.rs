//! WebSocket server implementation.
//!
//! Accepts WebSocket connections at `/ws`. Each connection declares a role
//! with its first `role` message:
//! - verifiers receive every published hub event through a broadcast
//!   forwarder and may issue administrative commands;
//! - senders are announced to the identity directory and receive the
//!   challenges addressed to them through a per-participant channel.
//!
//! When the connection closes, its forwarders are aborted and a sender is
//! forgotten by the directory.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use troof_presence::{PresenceError, PresenceHub};
use troof_types::{
    ChallengeId, ExternalIdentity, HubEvent, IdentityKind, MeetingId, ParticipantId, Timestamp,
};

use crate::fanout::{ConnectionId, FanOut};
use crate::messages::{
    parse_kind, roster_inputs, sender_hello, signed_response, verify_request, ClientMessage, Role,
    ServerMessage,
};
use crate::timers::DetectionTimers;
use crate::WsError;

type WsSender = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

/// Transport settings.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Shared secret every connection must present in `auth` first.
    pub hub_token: Option<String>,
    /// Kind assumed for roster keys that do not state one.
    pub identity_kind: IdentityKind,
    /// Ping period; a connection that misses one pong is closed.
    pub heartbeat: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hub_token: None,
            identity_kind: IdentityKind::Email,
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Shared state for the WebSocket server.
pub struct WsState {
    pub hub: Arc<PresenceHub>,
    pub fanout: Arc<FanOut>,
    pub timers: Arc<DetectionTimers>,
    pub config: ServerConfig,
    next_connection: AtomicU64,
}

impl WsState {
    pub fn new(hub: Arc<PresenceHub>, fanout: Arc<FanOut>, config: ServerConfig) -> Self {
        Self {
            hub,
            fanout,
            timers: Arc::new(DetectionTimers::new()),
            config,
            next_connection: AtomicU64::new(1),
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_connection.fetch_add(1, Ordering::Relaxed)
    }

    fn detect_window(&self) -> Duration {
        Duration::from_millis(self.hub.params().detect_window_ms)
    }
}

/// The WebSocket server, configured with shared state.
pub struct WebSocketServer {
    pub state: Arc<WsState>,
}

impl WebSocketServer {
    pub fn new(state: Arc<WsState>) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .with_state(self.state.clone())
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn start(
        &self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), WsError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| WsError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), WsError> {
        if let Ok(addr) = listener.local_addr() {
            info!("WebSocket server listening on {}", addr);
        }
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(WsError::Serve)?;
        self.state.timers.cancel_all();
        info!("WebSocket server stopped");
        Ok(())
    }
}

/// Axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-connection state.
struct Connection {
    id: ConnectionId,
    role: Option<Role>,
    participant: Option<ParticipantId>,
    authed: bool,
    forwarders: Vec<JoinHandle<()>>,
}

enum Flow {
    Continue,
    Close,
}

/// Handle a single WebSocket connection.
///
/// The flow:
/// 1. Split the socket into sender and receiver halves and greet the client.
/// 2. Dispatch client messages; ping the client on every heartbeat tick.
/// 3. Forwarder tasks relay hub events to the client as its role requires.
/// 4. On disconnect, abort the forwarders and forget the participant.
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(tokio::sync::Mutex::new(ws_sender));

    let mut conn = Connection {
        id: state.next_connection_id(),
        role: None,
        participant: None,
        authed: state.config.hub_token.is_none(),
        forwarders: Vec::new(),
    };
    debug!(connection = conn.id, "New WebSocket client connected");

    send_json(
        &ws_sender,
        &ServerMessage::Hello {
            role: None,
            participant_id: None,
            enrolled: None,
            auth_required: !conn.authed,
            hub_time: Timestamp::now(),
        },
    )
    .await;

    let mut heartbeat = tokio::time::interval(state.config.heartbeat);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(connection = conn.id, "WebSocket receive error: {}", e);
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => {
                        if let Flow::Close = handle_text_message(&text, &state, &mut conn, &ws_sender).await {
                            break;
                        }
                    }
                    Message::Pong(_) => awaiting_pong = false,
                    Message::Ping(data) => {
                        let mut sender = ws_sender.lock().await;
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Message::Close(_) => {
                        debug!(connection = conn.id, "Client sent close frame");
                        break;
                    }
                    Message::Binary(_) => {}
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    debug!(connection = conn.id, "heartbeat missed, closing");
                    break;
                }
                awaiting_pong = true;
                let mut sender = ws_sender.lock().await;
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    for handle in conn.forwarders.drain(..) {
        handle.abort();
    }
    if let Some(participant) = conn.participant.take() {
        release_participant(&state, &participant, conn.id);
    }
    let _ = ws_sender.lock().await.close().await;
    debug!(connection = conn.id, "WebSocket client disconnected");
}

/// Drop `participant`'s route and forget it, unless a newer connection has
/// taken the route over.
fn release_participant(state: &WsState, participant: &ParticipantId, connection: ConnectionId) {
    if state.fanout.unregister(participant, connection) {
        state.hub.forget(participant);
    }
}

async fn send_json<T: Serialize>(ws_sender: &WsSender, value: &T) -> bool {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode reply: {}", e);
            return false;
        }
    };
    let mut sender = ws_sender.lock().await;
    sender.send(Message::Text(text)).await.is_ok()
}

async fn reply_error(ws_sender: &WsSender, message: impl Into<String>) {
    send_json(
        ws_sender,
        &ServerMessage::Error {
            message: message.into(),
        },
    )
    .await;
}

/// Administrative commands are reserved for verifier connections.
async fn require_verifier(conn: &Connection, ws_sender: &WsSender, command: &str) -> bool {
    if conn.role == Some(Role::Verifier) {
        return true;
    }
    debug!(connection = conn.id, command, "command refused for non-verifier");
    reply_error(ws_sender, format!("{command} requires the verifier role")).await;
    false
}

/// Process a text message from the client.
async fn handle_text_message(
    text: &str,
    state: &Arc<WsState>,
    conn: &mut Connection,
    ws_sender: &WsSender,
) -> Flow {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(connection = conn.id, "dropping unparseable frame: {}", e);
            return Flow::Continue;
        }
    };
    let client_msg = match ClientMessage::deserialize(&value) {
        Ok(msg) => msg,
        Err(e) if conn.authed => {
            reject_malformed_frame(&value, &e, state, conn, ws_sender).await;
            return Flow::Continue;
        }
        Err(e) => {
            debug!(connection = conn.id, "ignoring malformed frame before auth: {}", e);
            return Flow::Continue;
        }
    };

    if !conn.authed {
        return match client_msg {
            ClientMessage::Auth { token }
                if state.config.hub_token.as_deref() == Some(token.as_str()) =>
            {
                conn.authed = true;
                debug!(connection = conn.id, "client authenticated");
                send_json(
                    ws_sender,
                    &ServerMessage::Hello {
                        role: None,
                        participant_id: None,
                        enrolled: None,
                        auth_required: false,
                        hub_time: Timestamp::now(),
                    },
                )
                .await;
                Flow::Continue
            }
            ClientMessage::Auth { .. } => {
                warn!(connection = conn.id, "rejected hub token");
                reply_error(ws_sender, "unauthorized").await;
                Flow::Close
            }
            _ => {
                debug!(connection = conn.id, "ignoring message before auth");
                Flow::Continue
            }
        };
    }

    match client_msg {
        ClientMessage::Role {
            role: Role::Verifier,
            ..
        } => become_verifier(state, conn, ws_sender).await,
        ClientMessage::Role {
            role: Role::Sender,
            participant_id,
            display_name,
            meeting_id,
            external_identity,
            participant_uuid,
            zoom_email,
            enroll_code,
        } => {
            let hello = sender_hello(
                participant_id,
                display_name,
                meeting_id,
                external_identity,
                participant_uuid,
                zoom_email,
                enroll_code,
            );
            become_sender(state, conn, ws_sender, hello).await;
        }
        ClientMessage::RegisterPubkey { pem } => {
            let participant = match (conn.role, &conn.participant) {
                (Some(Role::Sender), Some(id)) => id.clone(),
                _ => {
                    send_json(
                        ws_sender,
                        &ServerMessage::EnrollRequired {
                            message: "announce as an enrolled sender first".into(),
                        },
                    )
                    .await;
                    return Flow::Continue;
                }
            };
            match state.hub.register_key(&participant, &pem) {
                Ok(key_id) => debug!(participant_id = %participant, key_id, "key registered"),
                Err(PresenceError::EnrollmentRequired(_)) => {
                    send_json(
                        ws_sender,
                        &ServerMessage::EnrollRequired {
                            message: "participant is not enrolled".into(),
                        },
                    )
                    .await;
                }
                Err(e) => reply_error(ws_sender, e.to_string()).await,
            }
        }
        ClientMessage::SetMeeting { meeting_id, roster } => {
            if !require_verifier(conn, ws_sender, "set_meeting").await {
                return Flow::Continue;
            }
            if meeting_id.trim().is_empty() {
                reply_error(ws_sender, "set_meeting needs a meetingId").await;
                return Flow::Continue;
            }
            let inputs = roster_inputs(roster, state.config.identity_kind);
            state
                .hub
                .set_meeting_roster(&MeetingId::new(meeting_id), inputs);
        }
        ClientMessage::BindAttendee {
            meeting_id,
            identity_key,
            kind,
            participant_id,
        } => {
            if !require_verifier(conn, ws_sender, "bind_attendee").await {
                return Flow::Continue;
            }
            let identity = parse_kind(kind.as_deref(), state.config.identity_kind).and_then(|kind| {
                ExternalIdentity::new(kind, &identity_key)
                    .map_err(|e| PresenceError::MalformedPayload(e.to_string()))
            });
            match identity {
                Ok(identity) if !participant_id.trim().is_empty() => state.hub.bind_attendee(
                    &MeetingId::new(meeting_id),
                    identity,
                    ParticipantId::new(participant_id),
                ),
                Ok(_) => reply_error(ws_sender, "bind_attendee needs a participantId").await,
                Err(e) => reply_error(ws_sender, e.to_string()).await,
            }
        }
        ClientMessage::VerifyNow {
            meeting_id,
            by,
            target,
            payload,
        } => {
            if !require_verifier(conn, ws_sender, "verify_now").await {
                return Flow::Continue;
            }
            let request = match verify_request(meeting_id, by, target, payload) {
                Ok(request) => request,
                Err(e) => {
                    reply_error(ws_sender, e.to_string()).await;
                    return Flow::Continue;
                }
            };
            match state.hub.request_verification(request) {
                Ok(payload) => state.timers.schedule(
                    state.hub.clone(),
                    payload.challenge_id,
                    state.detect_window(),
                ),
                // Already reported to observers and the target.
                Err(PresenceError::RateLimited { .. }) => {}
                Err(e) => reply_error(ws_sender, e.to_string()).await,
            }
        }
        ClientMessage::Sidecar {
            participant_id,
            payload,
        } => {
            if !may_answer_for(conn, &participant_id) {
                reply_error(ws_sender, SIDECAR_NOT_HELD).await;
                return Flow::Continue;
            }
            let participant = ParticipantId::new(participant_id.clone());
            let meeting_id = Some(payload.meeting_id.clone())
                .filter(|m| !m.trim().is_empty())
                .map(MeetingId::new);
            let challenge_id = payload
                .challenge_id
                .clone()
                .filter(|c| !c.trim().is_empty())
                .map(ChallengeId::new);
            let response = match signed_response(participant_id, payload) {
                Ok(response) => response,
                Err(e) => {
                    let detail = e.to_string();
                    state
                        .hub
                        .reject_malformed(&participant, meeting_id, challenge_id, &detail);
                    reply_error(ws_sender, detail).await;
                    return Flow::Continue;
                }
            };
            let challenge_id = response.challenge_id.clone();
            match state.hub.submit_response(response) {
                Ok(_) => {
                    if let Some(id) = challenge_id {
                        state.timers.cancel(&id);
                    }
                }
                // Published as a challenge violation.
                Err(PresenceError::Challenge(_)) => {}
                Err(e) => reply_error(ws_sender, e.to_string()).await,
            }
        }
        ClientMessage::ParticipantsRequest => {
            send_json(
                ws_sender,
                &HubEvent::Participants {
                    list: state.hub.participants(),
                },
            )
            .await;
        }
        ClientMessage::ResetKeys => {
            if require_verifier(conn, ws_sender, "reset_keys").await {
                state.hub.reset_keys();
            }
        }
        ClientMessage::Auth { .. } => {}
        ClientMessage::Ping => {
            send_json(ws_sender, &ServerMessage::Pong).await;
        }
        ClientMessage::Unknown => {
            debug!(connection = conn.id, "ignoring unknown message kind");
        }
    }
    Flow::Continue
}

const SIDECAR_NOT_HELD: &str = "sidecar for a participant this connection does not hold";

/// Verifiers may relay any participant's response; a sender only its own.
fn may_answer_for(conn: &Connection, participant_id: &str) -> bool {
    match conn.role {
        Some(Role::Verifier) => true,
        Some(Role::Sender) => {
            conn.participant.as_ref().map(ParticipantId::as_str) == Some(participant_id)
        }
        None => false,
    }
}

/// A JSON frame of a known `type` whose fields do not fit it. The client
/// is told why; a `sidecar` is also reported to observers as a malformed
/// verification result.
async fn reject_malformed_frame(
    value: &Value,
    error: &serde_json::Error,
    state: &Arc<WsState>,
    conn: &Connection,
    ws_sender: &WsSender,
) {
    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        debug!(connection = conn.id, "dropping frame without a type: {}", error);
        return;
    };
    debug!(connection = conn.id, kind, "malformed frame: {}", error);
    let detail = format!("malformed {kind}: {error}");
    if kind == "sidecar" {
        let claimed = value
            .get("participantId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| conn.participant.as_ref().map(ToString::to_string));
        match claimed {
            Some(id) if may_answer_for(conn, &id) => {
                let payload_field = |name: &str| {
                    value
                        .get("payload")
                        .and_then(|p| p.get(name))
                        .and_then(Value::as_str)
                        .filter(|s| !s.trim().is_empty())
                        .map(str::to_string)
                };
                state.hub.reject_malformed(
                    &ParticipantId::new(id),
                    payload_field("meetingId").map(MeetingId::new),
                    payload_field("challengeId").map(ChallengeId::new),
                    &detail,
                );
            }
            Some(_) => {
                reply_error(ws_sender, SIDECAR_NOT_HELD).await;
                return;
            }
            None => {}
        }
    }
    reply_error(ws_sender, detail).await;
}

async fn become_verifier(state: &Arc<WsState>, conn: &mut Connection, ws_sender: &WsSender) {
    if let Some(participant) = conn.participant.take() {
        release_participant(state, &participant, conn.id);
    }
    let first_time = conn.role != Some(Role::Verifier);
    conn.role = Some(Role::Verifier);

    // Subscribe before taking the snapshot so nothing falls in between.
    let rx = first_time.then(|| state.fanout.subscribe());
    send_json(
        ws_sender,
        &ServerMessage::Hello {
            role: Some(Role::Verifier),
            participant_id: None,
            enrolled: None,
            auth_required: false,
            hub_time: Timestamp::now(),
        },
    )
    .await;
    for event in state.hub.observer_snapshot() {
        send_json(ws_sender, &event).await;
    }
    if let Some(rx) = rx {
        let sender = ws_sender.clone();
        let connection = conn.id;
        conn.forwarders.push(tokio::spawn(async move {
            forward_events(rx, sender, connection).await;
        }));
    }
    info!(connection = conn.id, "verifier connected");
}

async fn become_sender(
    state: &Arc<WsState>,
    conn: &mut Connection,
    ws_sender: &WsSender,
    hello: troof_presence::SenderHello,
) {
    if conn.role == Some(Role::Verifier) {
        reply_error(ws_sender, "connection is already a verifier").await;
        return;
    }
    let presented_code = hello.enroll_code.is_some();
    let view = match state.hub.announce(hello) {
        Ok(view) => view,
        Err(e) => {
            reply_error(ws_sender, e.to_string()).await;
            return;
        }
    };

    if let Some(previous) = conn.participant.take() {
        if previous != view.id {
            release_participant(state, &previous, conn.id);
        }
    }
    let rx = state.fanout.register(view.id.clone(), conn.id);
    let sender = ws_sender.clone();
    conn.forwarders.push(tokio::spawn(async move {
        forward_direct(rx, sender).await;
    }));
    conn.participant = Some(view.id.clone());
    conn.role = Some(Role::Sender);

    send_json(
        ws_sender,
        &ServerMessage::Hello {
            role: Some(Role::Sender),
            participant_id: Some(view.id.clone()),
            enrolled: Some(view.enrolled),
            auth_required: false,
            hub_time: Timestamp::now(),
        },
    )
    .await;
    if presented_code && !view.enrolled {
        send_json(
            ws_sender,
            &ServerMessage::EnrollRequired {
                message: "unknown enrollment code".into(),
            },
        )
        .await;
    }
}

/// Forwarder task: relays published hub events to an observer connection.
async fn forward_events(
    mut rx: broadcast::Receiver<String>,
    ws_sender: WsSender,
    connection: ConnectionId,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let mut sender = ws_sender.lock().await;
                if sender.send(Message::Text(event)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(connection, "Observer lagged behind by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(connection, "Broadcast channel closed");
                break;
            }
        }
    }
}

/// Forwarder task: relays events addressed to one participant.
async fn forward_direct(mut rx: mpsc::UnboundedReceiver<String>, ws_sender: WsSender) {
    while let Some(event) = rx.recv().await {
        let mut sender = ws_sender.lock().await;
        if sender.send(Message::Text(event)).await.is_err() {
            break;
        }
    }
}
