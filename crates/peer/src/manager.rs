//! Peer Connection Manager.
//!
//! Owns the listener, at most one admitted peer, the set of connections still
//! in their handshake window, and the table of delegated requests awaiting an
//! answer. State lives behind a synchronous mutex that is never held across an
//! `.await`; socket I/O happens in per-connection tasks that talk to the
//! manager through the methods below.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    serde::Serialize,
    serde_json::{Map, Value, json},
    tokio::{
        net::TcpListener,
        sync::{mpsc, oneshot, watch},
        time::MissedTickBehavior,
    },
    tokio_tungstenite::tungstenite::{
        Message,
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, trace, warn},
};

use {
    tabwire_common::{BridgeEvent, EventBus, LossReason, now_ms},
    tabwire_config::PeerConfig,
    tabwire_protocol::{
        Challenge, DelegatedRequest, DelegatedResponse, Handshake, HandshakeResponse, PeerMessage,
        ServerIdentity, peer::HANDSHAKE_REQUIRED_FIELDS,
    },
};

use crate::{
    connection,
    error::{Context, Error, Result},
    listener::bind_with_retry,
};

pub(crate) type PeerSender = mpsc::UnboundedSender<Message>;

/// Public view of the admitted peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub peer_id: String,
    pub version: String,
    pub connection_id: String,
    pub remote_addr: SocketAddr,
    pub capabilities: Map<String, Value>,
    pub admitted_at_ms: u64,
}

struct PendingConnection {
    remote_addr: SocketAddr,
    accepted_at: Instant,
}

struct AdmittedPeer {
    summary: PeerSummary,
    sender: PeerSender,
    last_seen: Instant,
    unresponsive: bool,
    last_status: Option<Value>,
}

struct PendingRequest {
    operation: String,
    conn_id: String,
    submitted_at: Instant,
    sender: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PeerState {
    pending: HashMap<String, PendingConnection>,
    admitted: Option<AdmittedPeer>,
    requests: HashMap<u64, PendingRequest>,
}

impl PeerState {
    fn take_requests_for(&mut self, conn_id: &str) -> Vec<(u64, PendingRequest)> {
        let ids: Vec<u64> = self
            .requests
            .iter()
            .filter(|(_, r)| r.conn_id == conn_id)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.requests.remove(&id).map(|r| (id, r)))
            .collect()
    }
}

pub struct PeerManager {
    config: PeerConfig,
    server: ServerIdentity,
    local_addr: SocketAddr,
    state: Mutex<PeerState>,
    next_request_id: AtomicU64,
    events: EventBus,
    peer_tx: watch::Sender<Option<PeerSummary>>,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl PeerManager {
    /// Bind the listener and start the accept and heartbeat loops.
    pub async fn start(
        config: PeerConfig,
        server: ServerIdentity,
        events: EventBus,
    ) -> Result<Arc<Self>> {
        let listener =
            bind_with_retry(&config.host, config.port, config.max_port_retries).await?;
        let local_addr = listener
            .local_addr()
            .context("peer listener has no local address")?;
        let (peer_tx, _) = watch::channel(None);

        let manager = Arc::new(Self {
            config,
            server,
            local_addr,
            state: Mutex::new(PeerState::default()),
            next_request_id: AtomicU64::new(1),
            events,
            peer_tx,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        });

        info!(addr = %local_addr, "peer listener started");
        manager.events.publish(BridgeEvent::ListenerStarted { addr: local_addr });

        tokio::spawn(Arc::clone(&manager).accept_loop(listener));
        tokio::spawn(Arc::clone(&manager).heartbeat_loop());
        Ok(manager)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn peer(&self) -> Option<PeerSummary> {
        self.lock().admitted.as_ref().map(|p| p.summary.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().admitted.is_some()
    }

    pub fn pending_requests(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn pending_connections(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Watch the admitted peer. Every holder observes the same transitions.
    pub fn subscribe_peer(&self) -> watch::Receiver<Option<PeerSummary>> {
        self.peer_tx.subscribe()
    }

    /// Status document for diagnostics and the peer-status resource.
    pub fn status(&self) -> Value {
        let state = self.lock();
        let peer = state.admitted.as_ref().map(|p| {
            json!({
                "peer": p.summary,
                "silentForMs": p.last_seen.elapsed().as_millis() as u64,
                "unresponsive": p.unresponsive,
                "lastStatus": p.last_status,
            })
        });
        let handshaking: Vec<Value> = state
            .pending
            .iter()
            .map(|(id, c)| {
                json!({
                    "connectionId": id,
                    "remoteAddr": c.remote_addr,
                    "waitingMs": c.accepted_at.elapsed().as_millis() as u64,
                })
            })
            .collect();
        json!({
            "listening": self.local_addr,
            "connected": peer.is_some(),
            "admitted": peer,
            "pendingConnections": handshaking,
            "pendingRequests": state.requests.len(),
        })
    }

    /// Wait until a peer is admitted, or `timeout` elapses.
    pub async fn wait_for_peer(&self, timeout: Duration) -> Option<PeerSummary> {
        let mut rx = self.peer_tx.subscribe();
        let admitted = tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await;
        let peer = match admitted {
            Ok(Ok(peer)) => peer.clone(),
            _ => None,
        };
        peer
    }

    /// Forward an operation to the admitted peer and wait for its answer.
    ///
    /// Dropping the returned future forgets the request; a late answer is then
    /// logged as an unknown id.
    pub async fn delegate(&self, operation: &str, args: Value) -> Result<Value> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let (sender, conn_id) = {
            let mut state = self.lock();
            let Some(peer) = state.admitted.as_ref() else {
                return Err(Error::NoPeerConnected);
            };
            let sender = peer.sender.clone();
            let conn_id = peer.summary.connection_id.clone();
            state.requests.insert(request_id, PendingRequest {
                operation: operation.to_string(),
                conn_id: conn_id.clone(),
                submitted_at: Instant::now(),
                sender: tx,
            });
            (sender, conn_id)
        };
        let _guard = RequestGuard {
            manager: self,
            request_id,
        };

        let frame = PeerMessage::Request(DelegatedRequest {
            request_id,
            operation_name: operation.to_string(),
            args,
        })
        .to_text()?;
        if sender.send(Message::Text(frame.into())).is_err() {
            return Err(Error::PeerDisconnected);
        }
        debug!(request_id, operation, conn_id = %conn_id, "delegated request sent");

        match tokio::time::timeout(self.config.request_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::PeerDisconnected),
            Err(_) => {
                warn!(request_id, operation, "delegated request timed out");
                Err(Error::DelegatedCallTimeout {
                    operation: operation.to_string(),
                    timeout_ms: self.config.request_timeout_ms,
                })
            },
        }
    }

    /// Stop accepting, close every socket, and fail outstanding requests.
    ///
    /// Idempotent and synchronous so it can run from `Drop`.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let (peer, requests) = {
            let mut state = self.lock();
            state.pending.clear();
            let requests: Vec<PendingRequest> = state.requests.drain().map(|(_, r)| r).collect();
            (state.admitted.take(), requests)
        };

        let failed = requests.len();
        for request in requests {
            let _ = request.sender.send(Err(Error::ShuttingDown));
        }
        if let Some(peer) = peer {
            let _ = peer.sender.send(close_frame(CloseCode::Away, "bridge shutting down"));
            self.events.publish(BridgeEvent::PeerLost {
                peer_id: peer.summary.peer_id.clone(),
                connection_id: peer.summary.connection_id.clone(),
                reason: LossReason::Shutdown,
                failed_requests: failed,
            });
        }
        self.peer_tx.send_replace(None);
        info!(failed_requests = failed, "peer manager stopped");
    }

    // ── Loops ────────────────────────────────────────────────────────────

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "peer accept failed");
                        continue;
                    },
                },
            };
            tokio::spawn(connection::handle_socket(
                Arc::clone(&self),
                stream,
                remote_addr,
            ));
        }
        debug!(addr = %self.local_addr, "peer listener closed");
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.probe(),
            }
        }
    }

    /// Send one heartbeat and flag the peer if it has been silent too long.
    /// A silent peer is reported, never evicted.
    fn probe(&self) {
        let liveness = self.config.liveness_timeout();
        let unresponsive = {
            let mut state = self.lock();
            let Some(peer) = state.admitted.as_mut() else {
                return;
            };
            let heartbeat = PeerMessage::Heartbeat {
                timestamp: now_ms(),
            };
            if let Ok(text) = heartbeat.to_text() {
                let _ = peer.sender.send(Message::Text(text.into()));
            }
            let silent = peer.last_seen.elapsed();
            if silent > liveness && !peer.unresponsive {
                peer.unresponsive = true;
                Some((peer.summary.peer_id.clone(), silent))
            } else {
                None
            }
        };
        if let Some((peer_id, silent)) = unresponsive {
            let silent_for_ms = silent.as_millis() as u64;
            warn!(peer_id = %peer_id, silent_for_ms, "peer unresponsive");
            self.events.publish(BridgeEvent::PeerUnresponsive {
                peer_id,
                silent_for_ms,
            });
        }
    }

    // ── Connection hooks ─────────────────────────────────────────────────

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.config.max_frame_bytes);
        config.max_frame_size = Some(self.config.max_frame_bytes);
        config
    }

    pub(crate) fn challenge(&self) -> PeerMessage {
        PeerMessage::Challenge(Challenge {
            required: HANDSHAKE_REQUIRED_FIELDS
                .iter()
                .map(|f| (*f).to_string())
                .collect(),
            server: self.server.clone(),
            timeout_ms: self.config.handshake_timeout_ms,
        })
    }

    pub(crate) fn register_pending(&self, conn_id: &str, remote_addr: SocketAddr) {
        self.lock().pending.insert(conn_id.to_string(), PendingConnection {
            remote_addr,
            accepted_at: Instant::now(),
        });
        self.events.publish(BridgeEvent::PeerConnecting {
            connection_id: conn_id.to_string(),
            remote_addr,
        });
    }

    pub(crate) fn forget_pending(&self, conn_id: &str) -> Option<Duration> {
        self.lock()
            .pending
            .remove(conn_id)
            .map(|c| c.accepted_at.elapsed())
    }

    /// Promote a connection to the admitted peer, evicting whoever held the slot.
    pub(crate) fn admit(
        &self,
        conn_id: &str,
        remote_addr: SocketAddr,
        handshake: ValidHandshake,
        sender: PeerSender,
    ) -> PeerSummary {
        let summary = PeerSummary {
            peer_id: handshake.peer_id,
            version: handshake.version,
            connection_id: conn_id.to_string(),
            remote_addr,
            capabilities: handshake.capabilities,
            admitted_at_ms: now_ms(),
        };

        let (evicted, failed) = {
            let mut state = self.lock();
            let evicted = state.admitted.take();
            let failed = evicted
                .as_ref()
                .map(|old| state.take_requests_for(&old.summary.connection_id))
                .unwrap_or_default();
            // Queued under the lock so no delegated request can overtake it.
            send_message(
                &sender,
                &PeerMessage::HandshakeResponse(HandshakeResponse {
                    success: true,
                    connection_id: conn_id.to_string(),
                    server: self.server.clone(),
                }),
            );
            state.admitted = Some(AdmittedPeer {
                summary: summary.clone(),
                sender,
                last_seen: Instant::now(),
                unresponsive: false,
                last_status: None,
            });
            (evicted, failed)
        };

        if let Some(old) = evicted {
            if old.summary.peer_id == summary.peer_id {
                info!(peer_id = %summary.peer_id, old_conn = %old.summary.connection_id, "peer reconnected, replacing previous connection");
            } else {
                warn!(old_peer = %old.summary.peer_id, new_peer = %summary.peer_id, "evicting admitted peer for a new one");
            }
            send_message(&old.sender, &PeerMessage::ConnectionRejected {
                reason: "superseded".into(),
            });
            let _ = old
                .sender
                .send(close_frame(CloseCode::Policy, "superseded"));
            self.finish_loss(&old.summary, LossReason::Superseded, failed);
        }

        info!(
            peer_id = %summary.peer_id,
            version = %summary.version,
            conn_id = %conn_id,
            "peer admitted"
        );
        self.events.publish(BridgeEvent::PeerAdmitted {
            peer_id: summary.peer_id.clone(),
            version: summary.version.clone(),
            connection_id: conn_id.to_string(),
            capabilities: summary.capabilities.clone(),
        });
        self.peer_tx.send_replace(Some(summary.clone()));
        summary
    }

    /// Whether `conn_id` is the currently admitted connection.
    pub(crate) fn is_current(&self, conn_id: &str) -> bool {
        self.lock()
            .admitted
            .as_ref()
            .is_some_and(|p| p.summary.connection_id == conn_id)
    }

    /// Record traffic from the admitted connection.
    pub(crate) fn touch(&self, conn_id: &str) {
        let mut state = self.lock();
        if let Some(peer) = state.admitted.as_mut()
            && peer.summary.connection_id == conn_id
        {
            peer.last_seen = Instant::now();
            if peer.unresponsive {
                peer.unresponsive = false;
                info!(peer_id = %peer.summary.peer_id, "peer responsive again");
            }
        }
    }

    /// Settle a pending request. Unknown ids are stale or duplicate answers.
    pub(crate) fn resolve(&self, response: DelegatedResponse) {
        let Some(pending) = self.lock().requests.remove(&response.request_id) else {
            warn!(request_id = response.request_id, "response for unknown request id, ignoring");
            return;
        };
        let elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64;
        debug!(
            request_id = response.request_id,
            operation = %pending.operation,
            success = response.success,
            elapsed_ms,
            "delegated response received"
        );
        let outcome = if response.success {
            Ok(response.result.unwrap_or(Value::Null))
        } else {
            Err(Error::Remote {
                operation: pending.operation,
                message: response.error_message(),
            })
        };
        let _ = pending.sender.send(outcome);
    }

    pub(crate) fn record_status(&self, conn_id: &str, payload: Map<String, Value>) {
        let payload = Value::Object(payload);
        let peer_id = {
            let mut state = self.lock();
            let Some(peer) = state.admitted.as_mut() else {
                return;
            };
            if peer.summary.connection_id != conn_id {
                return;
            }
            peer.last_status = Some(payload.clone());
            peer.summary.peer_id.clone()
        };
        self.events.publish(BridgeEvent::PeerStatus { peer_id, payload });
    }

    pub(crate) fn report_transport_error(&self, conn_id: &str, message: String) {
        warn!(conn_id = %conn_id, error = %message, "peer transport error");
        self.events.publish(BridgeEvent::PeerTransportError {
            connection_id: conn_id.to_string(),
            message,
        });
    }

    /// The socket for `conn_id` is gone. Only the admitted connection's loss
    /// changes state; an evicted connection closing later is a no-op.
    pub(crate) fn connection_closed(&self, conn_id: &str, reason: LossReason) {
        let (peer, failed) = {
            let mut state = self.lock();
            if !state
                .admitted
                .as_ref()
                .is_some_and(|p| p.summary.connection_id == conn_id)
            {
                return;
            }
            let peer = state.admitted.take();
            let failed = state.take_requests_for(conn_id);
            (peer, failed)
        };
        if let Some(peer) = peer {
            self.finish_loss(&peer.summary, reason, failed);
            self.peer_tx.send_replace(None);
        }
    }

    fn finish_loss(
        &self,
        summary: &PeerSummary,
        reason: LossReason,
        failed: Vec<(u64, PendingRequest)>,
    ) {
        let failed_requests = failed.len();
        for (request_id, request) in failed {
            debug!(request_id, operation = %request.operation, "failing request after peer loss");
            let _ = request.sender.send(Err(Error::PeerDisconnected));
        }
        info!(
            peer_id = %summary.peer_id,
            conn_id = %summary.connection_id,
            reason = %reason,
            failed_requests,
            "peer lost"
        );
        self.events.publish(BridgeEvent::PeerLost {
            peer_id: summary.peer_id.clone(),
            connection_id: summary.connection_id.clone(),
            reason,
            failed_requests,
        });
    }

    fn forget_request(&self, request_id: u64) {
        if self.lock().requests.remove(&request_id).is_some() {
            trace!(request_id, "pending request dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a request from the table when its caller stops waiting.
struct RequestGuard<'a> {
    manager: &'a PeerManager,
    request_id: u64,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.manager.forget_request(self.request_id);
    }
}

/// A handshake with every required field present.
#[derive(Debug, Clone)]
pub(crate) struct ValidHandshake {
    pub peer_id: String,
    pub version: String,
    pub capabilities: Map<String, Value>,
}

impl TryFrom<Handshake> for ValidHandshake {
    type Error = crate::error::RejectReason;

    fn try_from(hs: Handshake) -> std::result::Result<Self, Self::Error> {
        use crate::error::RejectReason::MissingField;

        let peer_id = hs
            .peer_id
            .filter(|s| !s.trim().is_empty())
            .ok_or(MissingField("peerId"))?;
        let version = hs
            .version
            .filter(|s| !s.trim().is_empty())
            .ok_or(MissingField("version"))?;
        let capabilities = hs.capabilities.ok_or(MissingField("capabilities"))?;
        Ok(Self {
            peer_id,
            version,
            capabilities,
        })
    }
}

pub(crate) fn send_message(sender: &PeerSender, message: &PeerMessage) {
    match message.to_text() {
        Ok(text) => {
            trace!(kind = message.kind(), "peer frame queued");
            let _ = sender.send(Message::Text(text.into()));
        },
        Err(e) => warn!(error = %e, kind = message.kind(), "failed to encode peer message"),
    }
}

pub(crate) fn close_frame(code: CloseCode, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}
