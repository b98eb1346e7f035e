//! Binary channel: framed payloads in both directions on one connection.
//! Outbound frames arrive from the server-wide distributor through a
//! bounded per-connection queue; inbound frames decode and go to the
//! installed handler.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use ad_protocol::frame::BinaryFrame;

use super::auth::Session;
use super::{
    extract_token, AuthQuery, BinaryHandler, Channel, ConnectionPermit, TransportServer,
    BINARY_QUEUE_CAPACITY,
};

/// `GET /binary` — WebSocket upgrade for the binary channel.
pub(crate) async fn binary_ws(
    State(server): State<Arc<TransportServer>>,
    Query(query): Query<AuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(permit) = server.try_admit(Channel::Binary) else {
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
    // Screenshots and videos travel here; the frame size is effectively
    // unbounded unlike the textual channels.
    ws.max_message_size(1 << 30)
        .on_upgrade(move |socket| handle_binary(socket, server, session, permit))
        .into_response()
}

async fn handle_binary(
    socket: WebSocket,
    server: Arc<TransportServer>,
    session: Session,
    _permit: ConnectionPermit,
) {
    let conn_id = server.next_conn_id();
    let conn_cancel = server.cancel_token().child_token();
    let (tx, mut rx) = mpsc::channel::<BinaryFrame>(BINARY_QUEUE_CAPACITY);
    server.register_binary(conn_id, tx);

    tracing::info!(conn_id, session_id = %session.id, "binary connection open");

    let (mut sink, mut stream) = socket.split();

    // Sender loop: one wire frame per queued frame, in enqueue order.
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
                frame = rx.recv() => match frame {
                    Some(frame) => {
                        if sink.send(Message::Binary(frame.encode().to_vec())).await.is_err() {
                            writer_cancel.cancel();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    // Reader loop: decode inbound frames and hand them over.
    loop {
        let msg = tokio::select! {
            _ = conn_cancel.cancelled() => break,
            msg = stream.next() => msg,
        };
        match msg {
            Some(Ok(Message::Binary(bytes))) => match BinaryFrame::decode(&bytes) {
                Ok(frame) => server.binary_handler().on_frame(frame).await,
                Err(e) => {
                    tracing::warn!(error = %e.message, "malformed inbound binary frame");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "binary read error");
                break;
            }
            _ => {}
        }
    }

    conn_cancel.cancel();
    server.unregister_binary(conn_id);
    server.authenticator().invalidate(&session.id);
    let _ = writer.await;
    tracing::info!(conn_id, session_id = %session.id, "binary connection closed");
}
