//! Control channel: strictly request/response after the opening
//! `system.hello` push. Requests dispatch concurrently; responses and the
//! hello share one per-connection outbound queue, so write order is stable.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use ad_protocol::envelope::{Envelope, MessageType};

use crate::router::Dispatcher;

use super::auth::Session;
use super::{
    extract_token, AuthQuery, Channel, ConnectionPermit, TransportServer,
    CONTROL_QUEUE_CAPACITY,
};

/// `GET /control` — WebSocket upgrade for the control channel.
pub(crate) async fn control_ws(
    State(server): State<Arc<TransportServer>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(permit) = server.try_admit(Channel::Control) else {
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
        .on_upgrade(move |socket| handle_control(socket, server, session, permit))
        .into_response()
}

async fn handle_control(
    socket: WebSocket,
    server: Arc<TransportServer>,
    session: Session,
    _permit: ConnectionPermit,
) {
    let conn_id = server.next_conn_id();
    let conn_cancel = server.cancel_token().child_token();
    let (tx, mut rx) = mpsc::channel::<Message>(CONTROL_QUEUE_CAPACITY);
    server.register_control(conn_id, tx.clone());

    tracing::info!(
        conn_id,
        session_id = %session.id,
        client_id = %session.client_id,
        "control connection open"
    );

    let (mut sink, mut stream) = socket.split();

    // Writer: drains the outbound queue; a failed write tears the
    // connection down (the handler's completed response is discarded).
    let writer_cancel = conn_cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "going away".into(),
                        })))
                        .await;
                    break;
                }
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            writer_cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    // Opening hello: the only unsolicited push on this channel.
    let hello = Envelope::event("system.hello", Some(json!({"sessionId": session.id})));
    if tx.send(Message::Text(hello.encode())).await.is_err() {
        conn_cancel.cancel();
    }

    // Keepalive: periodic pings, drop the connection when pongs stop.
    let last_pong = Arc::new(parking_lot::Mutex::new(Instant::now()));
    let hb = {
        let tx = tx.clone();
        let cancel = conn_cancel.clone();
        let last_pong = last_pong.clone();
        let interval = server.cfg().heartbeat_interval;
        let timeout = server.cfg().heartbeat_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if last_pong.lock().elapsed() > timeout {
                            tracing::warn!("control heartbeat timed out");
                            cancel.cancel();
                            break;
                        }
                        if tx.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        })
    };

    // Reader: inbound frames in arrival order; each request dispatches on
    // its own task so one slow handler never stalls the connection.
    loop {
        let msg = tokio::select! {
            _ = conn_cancel.cancelled() => break,
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                handle_text(&server, &tx, &conn_cancel, &session, &text);
            }
            Some(Ok(Message::Pong(_))) => {
                *last_pong.lock() = Instant::now();
            }
            Some(Ok(Message::Ping(_))) => {
                // The WebSocket stack answers pings on its own.
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "control read error");
                break;
            }
            _ => {
                tracing::debug!("ignoring non-text frame on control channel");
            }
        }
    }

    conn_cancel.cancel();
    server.unregister_control(conn_id);
    server.authenticator().invalidate(&session.id);
    hb.abort();
    let _ = writer.await;
    tracing::info!(conn_id, session_id = %session.id, "control connection closed");
}

fn handle_text(
    server: &Arc<TransportServer>,
    tx: &mpsc::Sender<Message>,
    conn_cancel: &tokio_util::sync::CancellationToken,
    session: &Session,
    text: &str,
) {
    let envelope = match Envelope::decode(text) {
        Ok(env) => env,
        Err(error) => {
            // Salvage the id so the client can still correlate the failure.
            let id = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("id").and_then(|i| i.as_str().map(str::to_string)))
                .unwrap_or_default();
            let response = Envelope::error_for_id(id, &error);
            let _ = tx.try_send(Message::Text(response.encode()));
            return;
        }
    };

    match envelope.kind {
        MessageType::Request => {
            server.authenticator().validate(&session.id);
            let dispatcher = server.dispatcher();
            let tx = tx.clone();
            let conn_cancel = conn_cancel.clone();
            tokio::spawn(async move {
                let response = dispatcher.dispatch(envelope).await;
                if tx.send(Message::Text(response.encode())).await.is_err() {
                    conn_cancel.cancel();
                }
            });
        }
        MessageType::Cancel => {
            // Cancellation is advisory; in-flight handlers run to completion.
            tracing::debug!(id = %envelope.id, "cancel received");
        }
        other => {
            tracing::debug!(kind = ?other, id = %envelope.id, "unexpected envelope on control channel");
        }
    }
}
