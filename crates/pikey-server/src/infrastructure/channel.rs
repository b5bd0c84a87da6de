//! Realtime channel: persistent WebSocket sessions.
//!
//! Each accepted connection becomes a session with two tasks:
//!
//! ```text
//!   client ──frames──▶ reader ──process──▶ Dispatcher
//!                        │
//!                        └── reply ──try_send──▶ [bounded queue] ──▶ writer ──▶ client
//!                                                                     ▲
//!                                                      heartbeat ping ┘
//! ```
//!
//! # Slow-consumer eviction
//!
//! Replies are queued with `try_send` and never awaited.  If a session's
//! queue is full (or its writer is gone) the session is removed from the
//! map and told to shut down.  Removal from the map is the single point of
//! truth, so a session is evicted at most once and the active count is
//! always the map size.
//!
//! # Liveness
//!
//! The writer sends a WebSocket ping every `heartbeat_interval`.  The reader
//! closes the session when nothing at all (including pongs) arrives within
//! `idle_timeout`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pikey_core::protocol::{decode_envelope, encode_envelope};
use pikey_core::{
    ChannelRequest, OutboundEnvelope, PointerAction, PointerCommand, PressCommand, TextCommand,
};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::dispatch::{DispatchError, Dispatcher, Job, Ticket};
use crate::domain::ChannelConfig;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Connection counters exposed under `channel` in `/stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStats {
    pub active_connections: usize,
    pub total_connections: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub last_connect_time: Option<DateTime<Utc>>,
}

/// The receiving ends handed to a session's writer.
pub struct SessionRegistration {
    pub id: Uuid,
    pub outbound: mpsc::Receiver<OutboundEnvelope>,
    pub shutdown: oneshot::Receiver<()>,
}

struct SessionHandle {
    peer: SocketAddr,
    outbound: mpsc::Sender<OutboundEnvelope>,
    shutdown: oneshot::Sender<()>,
}

/// Owns all live sessions and routes their messages into the dispatcher.
pub struct ChannelManager {
    dispatcher: Dispatcher,
    config: ChannelConfig,
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    total_connections: AtomicU64,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    last_connect: Mutex<Option<DateTime<Utc>>>,
}

impl ChannelManager {
    pub fn new(dispatcher: Dispatcher, config: ChannelConfig) -> Self {
        Self {
            dispatcher,
            config,
            sessions: RwLock::new(HashMap::new()),
            total_connections: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            last_connect: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Adds a session and returns the ends its writer consumes.
    pub fn register(&self, peer: SocketAddr) -> SessionRegistration {
        let id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.session_buffer.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.write_sessions().insert(
            id,
            SessionHandle {
                peer,
                outbound: outbound_tx,
                shutdown: shutdown_tx,
            },
        );
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        *self.last_connect.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        info!(
            "channel session {id} connected from {peer} ({} active)",
            self.active_sessions()
        );
        SessionRegistration {
            id,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        }
    }

    /// Removes a session after a normal disconnect.  Returns `false` if it
    /// was already gone (for example evicted).
    pub fn unregister(&self, id: Uuid) -> bool {
        match self.write_sessions().remove(&id) {
            Some(handle) => {
                info!("channel session {id} ({}) disconnected", handle.peer);
                true
            }
            None => false,
        }
    }

    /// Queues `envelope` for session `id` without waiting.
    ///
    /// A full or closed queue evicts the session.  Returns `true` if the
    /// envelope was queued.
    pub fn send(&self, id: Uuid, envelope: OutboundEnvelope) -> bool {
        let result = match self.read_sessions().get(&id) {
            Some(handle) => handle.outbound.try_send(envelope),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.evict(id, "outbound buffer full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.evict(id, "writer gone");
                false
            }
        }
    }

    /// Queues `envelope` on every session; returns how many accepted it.
    pub fn broadcast(&self, envelope: &OutboundEnvelope) -> usize {
        let ids: Vec<Uuid> = self.read_sessions().keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.send(*id, envelope.clone()))
            .count()
    }

    /// Disconnects every session.
    pub fn close_all(&self) {
        let drained: Vec<(Uuid, SessionHandle)> = self.write_sessions().drain().collect();
        if !drained.is_empty() {
            info!("closing {} channel session(s)", drained.len());
        }
        for (_, handle) in drained {
            let _ = handle.shutdown.send(());
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.read_sessions().len()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            active_connections: self.active_sessions(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            last_connect_time: *self.last_connect.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Handles one inbound text frame and returns the reply, if any.
    ///
    /// `pointer_move` has no acknowledgement.  It replies directly only when
    /// it cannot be admitted; a driver failure after admission is queued to
    /// the session as an error envelope once the move finishes.  Every other
    /// type waits for its outcome (bounded by the sync timeout) and replies
    /// with an acknowledgement or an error envelope.
    pub async fn process(self: &Arc<Self>, session: Uuid, text: &str) -> Option<OutboundEnvelope> {
        self.messages_received.fetch_add(1, Ordering::Relaxed);

        let envelope = match decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("session {session}: {e}");
                return Some(OutboundEnvelope::error(e.code(), None));
            }
        };
        let request_id = envelope.request_id.clone();
        let request = match envelope.request() {
            Ok(request) => request,
            Err(e) => {
                debug!("session {session}: {e}");
                return Some(OutboundEnvelope::error(e.code(), request_id));
            }
        };

        let kind = request.kind();
        let origin = session.to_string();
        let job = match request {
            ChannelRequest::Ping => return OutboundEnvelope::ack(kind, request_id),
            ChannelRequest::PointerMove(data) => {
                let (dx, dy) = data.scaled();
                Job::Pointer(PointerCommand::new(PointerAction::Move { dx, dy }, origin))
            }
            ChannelRequest::PointerClick(data) => Job::Pointer(PointerCommand::new(
                PointerAction::Click {
                    button: data.button,
                    kind: data.kind,
                },
                origin,
            )),
            ChannelRequest::PointerScroll(data) => {
                let (dx, dy) = data.steps();
                Job::Pointer(PointerCommand::new(PointerAction::Scroll { dx, dy }, origin))
            }
            ChannelRequest::KeyPress(data) => {
                Job::Press(PressCommand::with_hold_ms(data.key, data.duration, origin))
            }
            ChannelRequest::TypeText(data) => Job::Type(TextCommand::new(data.text, origin)),
        };

        let outcome = match self.dispatcher.submit(job).await {
            Ok(ticket) if kind.ack_type().is_none() => {
                self.report_detached_failure(session, ticket, request_id);
                return None;
            }
            Ok(ticket) => ticket.wait(self.dispatcher.config().sync_timeout).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => OutboundEnvelope::ack(kind, request_id),
            Err(e) => Some(OutboundEnvelope::error(error_message(&e), request_id)),
        }
    }

    /// Waits for an unacknowledged job in the background and queues an error
    /// envelope to `session` if the driver fails it.
    fn report_detached_failure(
        self: &Arc<Self>,
        session: Uuid,
        ticket: Ticket,
        request_id: Option<String>,
    ) {
        let manager = Arc::clone(self);
        let limit = self.dispatcher.config().sync_timeout;
        tokio::spawn(async move {
            match ticket.wait(limit).await {
                Ok(_) | Err(DispatchError::Timeout(_)) => {}
                Err(e) => {
                    warn!("session {session}: detached action failed: {e}");
                    manager.send(session, OutboundEnvelope::error(error_message(&e), request_id));
                }
            }
        });
    }

    fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn evict(&self, id: Uuid, reason: &str) {
        if let Some(handle) = self.write_sessions().remove(&id) {
            warn!("evicting channel session {id} ({}): {reason}", handle.peer);
            let _ = handle.shutdown.send(());
        }
    }

    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, SessionHandle>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, SessionHandle>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn error_message(err: &DispatchError) -> String {
    match err {
        DispatchError::CapabilityUnavailable("pointer") => "pointer_driver_unavailable".to_string(),
        other => other.to_string(),
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Binds the channel listener.
pub async fn bind_channel_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind channel listener on {addr}"))
}

/// Accepts connections until `running` is cleared.
pub async fn run_channel_server(
    listener: TcpListener,
    manager: Arc<ChannelManager>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    info!("channel listening on {}", listener.local_addr()?);

    while running.load(Ordering::Relaxed) {
        // Short accept timeout so the running flag is re-checked.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    if let Err(e) = run_session(manager, stream, peer).await {
                        warn!("channel connection {peer} ended with error: {e:#}");
                    }
                });
            }
            Ok(Err(e)) => error!("channel accept error: {e}"),
            Err(_) => {}
        }
    }

    info!("channel accept loop stopped");
    Ok(())
}

async fn run_session(
    manager: Arc<ChannelManager>,
    stream: TcpStream,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let ws = accept_async(stream)
        .await
        .with_context(|| format!("WebSocket handshake failed with {peer}"))?;
    let registration = manager.register(peer);
    let id = registration.id;
    let (sink, source) = ws.split();

    let mut writer = tokio::spawn(write_loop(
        sink,
        registration.outbound,
        registration.shutdown,
        Arc::clone(&manager),
    ));

    let writer_finished = tokio::select! {
        _ = read_loop(source, &manager, id) => false,
        _ = &mut writer => true,
    };

    manager.unregister(id);
    if !writer_finished {
        let _ = timeout(manager.config.write_timeout, writer).await;
    }
    debug!("channel session {id} finished");
    Ok(())
}

async fn read_loop(mut source: WsSource, manager: &Arc<ChannelManager>, id: Uuid) {
    let idle = manager.config.idle_timeout;
    loop {
        let frame = match timeout(idle, source.next()).await {
            Err(_) => {
                info!("channel session {id}: no activity for {idle:?}, closing");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                debug!("channel session {id}: read error: {e}");
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                if let Some(reply) = manager.process(id, &text).await {
                    if !manager.send(id, reply) {
                        return;
                    }
                }
            }
            Message::Binary(_) => warn!("channel session {id}: binary frame ignored"),
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => return,
            Message::Frame(_) => {}
        }
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<OutboundEnvelope>,
    mut shutdown: oneshot::Receiver<()>,
    manager: Arc<ChannelManager>,
) {
    let beat = manager.config.heartbeat_interval;
    let write_timeout = manager.config.write_timeout;
    let mut heartbeat = interval_at(Instant::now() + beat, beat);

    loop {
        let frame = tokio::select! {
            queued = outbound.recv() => match queued {
                Some(envelope) => match encode_envelope(&envelope) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        error!("dropping unencodable reply: {e}");
                        continue;
                    }
                },
                None => break,
            },
            _ = heartbeat.tick() => Message::Ping(Vec::new()),
            _ = &mut shutdown => {
                let _ = timeout(write_timeout, sink.send(Message::Close(None))).await;
                break;
            }
        };

        let is_reply = matches!(frame, Message::Text(_));
        match timeout(write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {
                if is_reply {
                    manager.record_sent();
                }
            }
            Ok(Err(e)) => {
                debug!("channel write failed: {e}");
                break;
            }
            Err(_) => {
                warn!("channel write timed out after {write_timeout:?}");
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
