//! Three-channel transport server.
//!
//! Three TCP listeners, one WebSocket upgrade path each: `/control`
//! (textual request/response), `/binary` (framed payloads, both
//! directions), `/events` (textual server push). Connections authenticate
//! on upgrade; each accepted connection is serviced by its channel module.

pub mod auth;
mod binary;
mod control;
mod events;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use axum::routing::get;
use axum::Router;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use ad_domain::config::AgentConfig;
use ad_domain::error::{AgentError, Result};
use ad_protocol::envelope::Envelope;
use ad_protocol::frame::BinaryFrame;

use crate::router::Dispatcher;
use auth::Authenticator;

/// Outbound binary queue depth; producers block when it is full.
const BINARY_QUEUE_CAPACITY: usize = 16;
/// Event fan-out buffer; slow subscribers lose the overflow.
const EVENT_BUFFER_CAPACITY: usize = 256;
/// Per-connection outbound buffer on the control channel.
const CONTROL_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub control_port: u16,
    pub binary_port: u16,
    pub event_port: u16,
    pub max_connections: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl From<&AgentConfig> for TransportConfig {
    fn from(c: &AgentConfig) -> Self {
        Self {
            host: c.host.clone(),
            control_port: c.control_port,
            binary_port: c.binary_port,
            event_port: c.event_port,
            max_connections: c.max_connections,
            heartbeat_interval: Duration::from_millis(c.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(c.heartbeat_timeout_ms),
            max_frame_bytes: c.max_frame_bytes,
        }
    }
}

/// The listeners' bound addresses, useful when ports are ephemeral.
#[derive(Debug, Clone, Copy)]
pub struct BoundPorts {
    pub control: SocketAddr,
    pub binary: SocketAddr,
    pub event: SocketAddr,
}

/// Consumer of inbound binary frames. The default drops them.
#[async_trait::async_trait]
pub trait BinaryHandler: Send + Sync + 'static {
    async fn on_frame(&self, frame: BinaryFrame);
}

struct NoopBinaryHandler;

#[async_trait::async_trait]
impl BinaryHandler for NoopBinaryHandler {
    async fn on_frame(&self, frame: BinaryFrame) {
        tracing::debug!(
            kind = ?frame.kind,
            bytes = frame.payload.len(),
            "inbound binary frame dropped (no handler installed)"
        );
    }
}

#[derive(Default)]
struct ChannelCounts {
    control: Arc<AtomicUsize>,
    binary: Arc<AtomicUsize>,
    event: Arc<AtomicUsize>,
}

pub struct TransportServer {
    cfg: TransportConfig,
    auth: Arc<Authenticator>,
    dispatcher: Arc<dyn Dispatcher>,
    binary_handler: RwLock<Arc<dyn BinaryHandler>>,
    event_tx: broadcast::Sender<Envelope>,
    binary_tx: mpsc::Sender<BinaryFrame>,
    binary_rx: Mutex<Option<mpsc::Receiver<BinaryFrame>>>,
    control_conns: RwLock<HashMap<u64, mpsc::Sender<Message>>>,
    binary_conns: RwLock<HashMap<u64, mpsc::Sender<BinaryFrame>>>,
    counts: ChannelCounts,
    conn_seq: AtomicU64,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportServer {
    pub fn new(
        cfg: TransportConfig,
        auth: Arc<Authenticator>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER_CAPACITY);
        let (binary_tx, binary_rx) = mpsc::channel(BINARY_QUEUE_CAPACITY);
        Self {
            cfg,
            auth,
            dispatcher,
            binary_handler: RwLock::new(Arc::new(NoopBinaryHandler)),
            event_tx,
            binary_tx,
            binary_rx: Mutex::new(Some(binary_rx)),
            control_conns: RwLock::new(HashMap::new()),
            binary_conns: RwLock::new(HashMap::new()),
            counts: ChannelCounts::default(),
            conn_seq: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// Replace the inbound binary consumer.
    pub fn set_binary_handler(&self, handler: Arc<dyn BinaryHandler>) {
        *self.binary_handler.write() = handler;
    }

    /// Bind the three listeners and start serving. Returns the bound
    /// addresses (the configured ports unless ephemeral).
    pub async fn start(self: &Arc<Self>) -> Result<BoundPorts> {
        let bind = |port: u16| {
            let host = self.cfg.host.clone();
            async move {
                TcpListener::bind(format!("{host}:{port}"))
                    .await
                    .map_err(|e| AgentError::internal(format!("bind {host}:{port}: {e}")))
            }
        };
        let control_listener = bind(self.cfg.control_port).await?;
        let binary_listener = bind(self.cfg.binary_port).await?;
        let event_listener = bind(self.cfg.event_port).await?;

        let ports = BoundPorts {
            control: control_listener.local_addr()?,
            binary: binary_listener.local_addr()?,
            event: event_listener.local_addr()?,
        };

        let mut tasks = self.tasks.lock();
        tasks.push(self.serve_channel(
            control_listener,
            Router::new()
                .route("/control", get(control::control_ws))
                .with_state(self.clone())
                .layer(TraceLayer::new_for_http()),
            "control",
        ));
        tasks.push(self.serve_channel(
            binary_listener,
            Router::new()
                .route("/binary", get(binary::binary_ws))
                .with_state(self.clone())
                .layer(TraceLayer::new_for_http()),
            "binary",
        ));
        tasks.push(self.serve_channel(
            event_listener,
            Router::new()
                .route("/events", get(events::event_ws))
                .with_state(self.clone())
                .layer(TraceLayer::new_for_http()),
            "event",
        ));
        tasks.push(self.spawn_binary_distributor());
        drop(tasks);

        tracing::info!(
            control = %ports.control,
            binary = %ports.binary,
            event = %ports.event,
            "transport listening"
        );
        Ok(ports)
    }

    fn serve_channel(
        self: &Arc<Self>,
        listener: TcpListener,
        app: Router,
        name: &'static str,
    ) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await;
            if let Err(e) = result {
                tracing::error!(channel = name, error = %e, "listener exited with error");
            } else {
                tracing::debug!(channel = name, "listener closed");
            }
        })
    }

    /// Single consumer of the outbound binary queue: forwards each frame to
    /// every live binary connection, preserving enqueue order. Back-pressure
    /// propagates from connection buffers to the main queue to producers.
    fn spawn_binary_distributor(self: &Arc<Self>) -> JoinHandle<()> {
        let server = self.clone();
        let mut rx = self
            .binary_rx
            .lock()
            .take()
            .unwrap_or_else(|| mpsc::channel(1).1);
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = server.cancel.cancelled() => break,
                    frame = rx.recv() => match frame {
                        Some(f) => f,
                        None => break,
                    },
                };
                let senders: Vec<mpsc::Sender<BinaryFrame>> =
                    server.binary_conns.read().values().cloned().collect();
                if senders.is_empty() {
                    tracing::warn!(
                        kind = ?frame.kind,
                        bytes = frame.payload.len(),
                        "binary frame dropped: no binary connection"
                    );
                    continue;
                }
                for sender in senders {
                    // A closed connection is cleaned up by its own handler.
                    let _ = sender.send(frame.clone()).await;
                }
            }
        })
    }

    // ── Producer-facing surface ─────────────────────────────────────

    /// Enqueue an outbound binary frame. Blocks while the queue is full;
    /// this is the only place producers wait on transport.
    pub async fn send_binary(&self, frame: BinaryFrame) -> Result<()> {
        self.binary_tx
            .send(frame)
            .await
            .map_err(|_| AgentError::internal("binary channel is shut down"))
    }

    /// Publish an event envelope to every event-channel subscriber.
    /// Best-effort: slow subscribers lose the overflow.
    pub fn emit_event(&self, envelope: Envelope) {
        let _ = self.event_tx.send(envelope);
    }

    /// Send the same envelope to every active control connection,
    /// swallowing individual failures.
    pub fn broadcast(&self, envelope: Envelope) {
        let text = envelope.encode();
        for sender in self.control_conns.read().values() {
            let _ = sender.try_send(Message::Text(text.clone()));
        }
    }

    /// Live session count, surfaced in `system.capabilities`.
    pub fn session_count(&self) -> usize {
        self.auth.session_count()
    }

    /// Close every connection with a going-away reason and stop the
    /// listeners. Background senders and subscribers drain on the token.
    pub async fn stop(&self) {
        tracing::info!("transport stopping");
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.control_conns.write().clear();
        self.binary_conns.write().clear();
        tracing::info!("transport stopped");
    }

    // ── Internal accessors for the channel modules ──────────────────

    pub(crate) fn cfg(&self) -> &TransportConfig {
        &self.cfg
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.dispatcher.clone()
    }

    pub(crate) fn binary_handler(&self) -> Arc<dyn BinaryHandler> {
        self.binary_handler.read().clone()
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<Envelope> {
        self.event_tx.subscribe()
    }

    pub(crate) fn next_conn_id(&self) -> u64 {
        self.conn_seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_control(&self, id: u64, tx: mpsc::Sender<Message>) {
        self.control_conns.write().insert(id, tx);
    }

    pub(crate) fn unregister_control(&self, id: u64) {
        self.control_conns.write().remove(&id);
    }

    pub(crate) fn register_binary(&self, id: u64, tx: mpsc::Sender<BinaryFrame>) {
        self.binary_conns.write().insert(id, tx);
    }

    pub(crate) fn unregister_binary(&self, id: u64) {
        self.binary_conns.write().remove(&id);
    }

    /// Connection admission per channel: over the cap, upgrades are
    /// refused with 503.
    pub(crate) fn try_admit(&self, channel: Channel) -> Option<ConnectionPermit> {
        let counter = match channel {
            Channel::Control => self.counts.control.clone(),
            Channel::Binary => self.counts.binary.clone(),
            Channel::Event => self.counts.event.clone(),
        };
        let prev = counter.fetch_add(1, Ordering::SeqCst);
        if prev >= self.cfg.max_connections {
            counter.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(ConnectionPermit { counter })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Channel {
    Control,
    Binary,
    Event,
}

/// Drop guard for the per-channel connection count.
pub(crate) struct ConnectionPermit {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) use auth::extract_token;

/// Query parameters accepted on every upgrade path.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct AuthQuery {
    pub token: Option<String>,
    /// Optional caller-chosen identity for logs and session records.
    pub client_id: Option<String>,
}
