//! Event channel: fan-out push of event envelopes. Each subscriber taps
//! the broadcast independently; delivery is best-effort, a lagging
//! subscriber silently loses the overflow.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;

use super::auth::Session;
use super::{extract_token, AuthQuery, Channel, ConnectionPermit, TransportServer};

/// `GET /events` — WebSocket upgrade for the event channel.
pub(crate) async fn event_ws(
    State(server): State<Arc<TransportServer>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(permit) = server.try_admit(Channel::Event) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };
    let token = extract_token(query.token.as_deref(), &headers);
    let client_id = query.client_id.unwrap_or_else(|| "controller".to_string());
    let session = match server
        .authenticator()
        .authenticate(token.as_deref(), &client_id)
    {
        Ok(session) => session,
        Err(_) => {
            return (StatusCode::UNAUTHORIZED, "authentication failed").into_response();
        }
    };
    ws.max_message_size(server.cfg().max_frame_bytes)
        .on_upgrade(move |socket| handle_events(socket, server, session, permit))
        .into_response()
}

async fn handle_events(
    socket: WebSocket,
    server: Arc<TransportServer>,
    session: Session,
    _permit: ConnectionPermit,
) {
    let conn_cancel = server.cancel_token().child_token();
    let mut events = server.subscribe_events();
    let (mut sink, mut stream) = socket.split();
    let last_pong = Arc::new(parking_lot::Mutex::new(Instant::now()));

    tracing::info!(session_id = %session.id, "event subscriber connected");

    // Reader side only consumes pongs and the close handshake.
    let reader = {
        let cancel = conn_cancel.clone();
        let last_pong = last_pong.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                match msg {
                    Message::Pong(_) => *last_pong.lock() = Instant::now(),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            cancel.cancel();
        })
    };

    let mut ticker = tokio::time::interval(server.cfg().heartbeat_interval);
    let heartbeat_timeout = server.cfg().heartbeat_timeout;

    loop {
        tokio::select! {
            _ = conn_cancel.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "going away".into(),
                    })))
                    .await;
                break;
            }
            _ = ticker.tick() => {
                if last_pong.lock().elapsed() > heartbeat_timeout {
                    tracing::warn!(session_id = %session.id, "event heartbeat timed out");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(envelope) => {
                    if sink.send(Message::Text(envelope.encode())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Best-effort channel: protect fast subscribers, drop
                    // this one's backlog.
                    tracing::debug!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    conn_cancel.cancel();
    server.authenticator().invalidate(&session.id);
    reader.abort();
    tracing::info!(session_id = %session.id, "event subscriber disconnected");
}
