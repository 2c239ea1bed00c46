//! One peer socket: challenge, handshake window, then the message loop.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt, stream::SplitStream},
    tokio::{net::TcpStream, sync::mpsc, time::Instant},
    tokio_tungstenite::{
        WebSocketStream, accept_async_with_config,
        tungstenite::{Message, protocol::frame::coding::CloseCode},
    },
    tracing::{debug, info, trace, warn},
};

use {
    tabwire_common::{BridgeEvent, LossReason},
    tabwire_protocol::PeerMessage,
};

use crate::{
    error::RejectReason,
    manager::{PeerManager, PeerSender, ValidHandshake, close_frame, send_message},
};

type PeerStream = SplitStream<WebSocketStream<TcpStream>>;

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) async fn handle_socket(
    manager: Arc<PeerManager>,
    stream: TcpStream,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    // The handshake window covers the upgrade too, so a socket that never
    // speaks WebSocket is dropped on the same deadline.
    manager.register_pending(&conn_id, remote_addr);
    let deadline = Instant::now() + manager.config().handshake_timeout();

    let upgraded = tokio::select! {
        _ = manager.shutdown_token().cancelled() => Err(RejectReason::ShuttingDown),
        upgraded = tokio::time::timeout_at(
            deadline,
            accept_async_with_config(stream, Some(manager.websocket_config())),
        ) => match upgraded {
            Ok(Ok(socket)) => Ok(socket),
            Ok(Err(e)) => Err(RejectReason::Malformed(format!("websocket upgrade failed: {e}"))),
            Err(_) => Err(RejectReason::Timeout),
        },
    };
    let socket = match upgraded {
        Ok(socket) => socket,
        Err(reason) => {
            let waited = manager.forget_pending(&conn_id).unwrap_or_default();
            warn!(
                conn_id = %conn_id,
                remote_addr = %remote_addr,
                reason = %reason,
                waited_ms = waited.as_millis() as u64,
                "peer: dropped before websocket upgrade"
            );
            manager.events().publish(BridgeEvent::PeerRejected {
                connection_id: conn_id,
                reason: reason.to_string(),
            });
            return;
        },
    };
    info!(conn_id = %conn_id, remote_addr = %remote_addr, "peer: new connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Write loop: drains the channel until a close frame goes out or every
    // sender is dropped.
    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() {
                debug!(conn_id = %write_conn_id, "peer: write loop closed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // ── Handshake phase ──────────────────────────────────────────────────

    send_message(&tx, &manager.challenge());

    let outcome = tokio::select! {
        _ = manager.shutdown_token().cancelled() => Err(RejectReason::ShuttingDown),
        waited = tokio::time::timeout_at(deadline, wait_for_handshake(&mut ws_rx)) => {
            waited.unwrap_or(Err(RejectReason::Timeout))
        },
    };
    let waited = manager.forget_pending(&conn_id).unwrap_or_default();

    let handshake = match outcome {
        Ok(handshake) => handshake,
        Err(reason) => {
            warn!(
                conn_id = %conn_id,
                reason = %reason,
                waited_ms = waited.as_millis() as u64,
                "peer: handshake rejected"
            );
            if reason.should_notify() {
                send_message(&tx, &PeerMessage::ConnectionRejected {
                    reason: reason.to_string(),
                });
                let code = match reason {
                    RejectReason::ShuttingDown => CloseCode::Away,
                    _ => CloseCode::Policy,
                };
                let _ = tx.send(close_frame(code, &reason.to_string()));
            }
            manager.events().publish(BridgeEvent::PeerRejected {
                connection_id: conn_id.clone(),
                reason: reason.to_string(),
            });
            drop(tx);
            let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, write_handle).await;
            return;
        },
    };

    manager.admit(&conn_id, remote_addr, handshake, tx.clone());

    // ── Message loop ─────────────────────────────────────────────────────

    let reason = message_loop(&manager, &conn_id, &tx, &mut ws_rx).await;

    // ── Cleanup ──────────────────────────────────────────────────────────

    manager.connection_closed(&conn_id, reason);
    info!(conn_id = %conn_id, reason = %reason, "peer: connection closed");
    drop(tx);
    let _ = tokio::time::timeout(WRITER_DRAIN_TIMEOUT, write_handle).await;
}

/// Wait for the first frame and require it to be a complete handshake.
async fn wait_for_handshake(rx: &mut PeerStream) -> Result<ValidHandshake, RejectReason> {
    while let Some(msg) = rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t,
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Ok(Message::Binary(_)) => {
                return Err(RejectReason::Malformed("binary frame".into()));
            },
            Ok(Message::Close(_)) | Err(_) => return Err(RejectReason::Closed),
        };
        return match PeerMessage::parse(text.as_str()) {
            Ok(PeerMessage::Handshake(hs)) => ValidHandshake::try_from(hs),
            Ok(other) => Err(RejectReason::NotAHandshake(other.kind().to_string())),
            Err(e) => Err(RejectReason::Malformed(e.to_string())),
        };
    }
    Err(RejectReason::Closed)
}

async fn message_loop(
    manager: &PeerManager,
    conn_id: &str,
    tx: &PeerSender,
    rx: &mut PeerStream,
) -> LossReason {
    loop {
        let msg = tokio::select! {
            _ = manager.shutdown_token().cancelled() => return LossReason::Shutdown,
            msg = rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(conn_id = %conn_id, error = %e, "peer: read error");
                return LossReason::SocketClosed;
            },
            None => return LossReason::SocketClosed,
        };

        if !manager.is_current(conn_id) {
            // Superseded: our close frame is on its way.
            if matches!(msg, Message::Close(_)) {
                return LossReason::Superseded;
            }
            trace!(conn_id = %conn_id, "peer: ignoring frame from superseded connection");
            continue;
        }
        manager.touch(conn_id);

        let text = match msg {
            Message::Text(t) => t,
            Message::Binary(data) => {
                manager.report_transport_error(
                    conn_id,
                    format!("unexpected binary frame ({} bytes)", data.len()),
                );
                continue;
            },
            Message::Close(_) => return LossReason::SocketClosed,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        let message = match PeerMessage::parse(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                manager.report_transport_error(conn_id, format!("invalid frame: {e}"));
                continue;
            },
        };
        trace!(conn_id = %conn_id, kind = message.kind(), "peer: frame received");

        match message {
            PeerMessage::Response(response) => manager.resolve(response),
            PeerMessage::Heartbeat { timestamp } => {
                send_message(tx, &PeerMessage::HeartbeatResponse { timestamp });
            },
            PeerMessage::HeartbeatResponse { .. } => {},
            PeerMessage::Disconnect { reason } => {
                info!(
                    conn_id = %conn_id,
                    reason = reason.as_deref().unwrap_or("none given"),
                    "peer: disconnect requested"
                );
                let _ = tx.send(close_frame(CloseCode::Normal, "bye"));
                return LossReason::Disconnected;
            },
            PeerMessage::Error { message, code } => {
                let code = code.map(|c| c.to_string()).unwrap_or_default();
                warn!(conn_id = %conn_id, code = %code, error = %message, "peer: reported error");
                manager.report_transport_error(conn_id, format!("peer error: {message}"));
            },
            PeerMessage::Status(payload) => manager.record_status(conn_id, payload),
            other => {
                debug!(conn_id = %conn_id, kind = other.kind(), "peer: ignoring unexpected message");
            },
        }
    }
}
