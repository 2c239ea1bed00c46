//! Protocol Handler: one client session over a framed stream.
//!
//! Requests are answered inline in arrival order, except `tools/call`, which
//! runs as its own task so a slow delegated call does not hold up `ping` or
//! a cancellation. Every outbound frame goes through a single writer task.
//!
//! On shutdown intake stops first, then the peer side fails its outstanding
//! calls so each in-flight `tools/call` still gets an answer, and only then
//! is the writer closed.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use {
    futures::{SinkExt, StreamExt},
    serde_json::Value,
    tabwire_catalog::Catalog,
    tabwire_common::{BridgeEvent, EventBus},
    tabwire_config::ServerConfig,
    tabwire_protocol::{
        Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcError,
        mcp::{CancelledParams, methods},
    },
    tabwire_transport::{ClientReader, ClientWriter, Inbound},
    tokio::{
        io::{AsyncRead, AsyncWrite},
        sync::{broadcast::error::RecvError, mpsc},
        task::{AbortHandle, JoinHandle},
    },
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{debug, error, info, trace, warn},
};

use crate::{
    error::{Context, Error, Result, parse_params},
    link::PeerLink,
    methods::{MethodContext, MethodRegistry},
    state::{ServerState, SessionPhase},
};

type Outbound = mpsc::UnboundedSender<Value>;
type InFlight = Arc<Mutex<HashMap<String, InFlightCall>>>;

/// How long in-flight calls get to answer once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct InFlightCall {
    id: Value,
    abort: AbortHandle,
}

pub struct ProtocolHandler {
    state: Arc<ServerState>,
    methods: Arc<MethodRegistry>,
}

impl ProtocolHandler {
    pub fn new(
        config: ServerConfig,
        catalog: Arc<Catalog>,
        link: Arc<dyn PeerLink>,
        events: EventBus,
    ) -> Self {
        Self {
            state: Arc::new(ServerState::new(config, catalog, link, events)),
            methods: Arc::new(MethodRegistry::new()),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Answer one request without going through a stream.
    pub async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        self.methods
            .dispatch(MethodContext {
                request_id: req.id,
                method: req.method,
                params: req.params.unwrap_or(Value::Null),
                state: Arc::clone(&self.state),
            })
            .await
    }

    /// Serve the session until the client closes the stream or `shutdown`
    /// fires. In-flight calls are answered before this returns; on shutdown,
    /// calls still running after a short grace period get an error response.
    pub async fn serve<R, W>(
        &self,
        mut reader: ClientReader<R>,
        mut writer: ClientWriter<W>,
        shutdown: CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Value>();
        let write_handle: JoinHandle<Result<()>> = tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                writer.send(frame).await?;
            }
            Ok(())
        });
        let watcher = self.spawn_peer_watcher();
        let inflight: InFlight = Arc::default();
        let tracker = TaskTracker::new();

        let outcome = loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("client transport stopping");
                    break Ok(());
                },
                frame = reader.next() => frame,
            };
            match frame {
                None => {
                    info!("client stream closed");
                    break Ok(());
                },
                Some(Err(e)) => {
                    error!(error = %e, "client transport failed");
                    break Err(Error::from(e));
                },
                Some(Ok(Inbound::Malformed(reason))) => {
                    warn!(reason = %reason, "unparseable client frame");
                    send(
                        &out_tx,
                        JsonRpcResponse::failure(Value::Null, RpcError::parse_error(reason)),
                    );
                },
                Some(Ok(Inbound::Message(value))) => {
                    self.on_message(value, &out_tx, &inflight, &tracker).await;
                },
            }
        };

        tracker.close();
        if shutdown.is_cancelled() {
            self.state.link.shutdown();
            if tokio::time::timeout(SHUTDOWN_GRACE, tracker.wait()).await.is_err() {
                abandon_in_flight(&inflight, &out_tx);
            }
        }
        tracker.wait().await;
        watcher.abort();
        self.state.session.write().await.phase = SessionPhase::Closed;
        self.state.events.publish(BridgeEvent::ClientDisconnected);

        drop(out_tx);
        let written = write_handle.await.context("client writer task failed")?;
        outcome.and(written)
    }

    async fn on_message(
        &self,
        value: Value,
        out: &Outbound,
        inflight: &InFlight,
        tracker: &TaskTracker,
    ) {
        trace!(frame = %value, "client frame");
        let incoming = match Incoming::from_value(value) {
            Ok(incoming) => incoming,
            Err((id, err)) => {
                warn!(error = %err, "invalid client message");
                send(out, JsonRpcResponse::failure(id, err));
                return;
            },
        };
        match incoming {
            Incoming::Response(resp) => debug!(id = %resp.id, "ignoring response from client"),
            Incoming::Notification(notification) => self.on_notification(notification, inflight),
            Incoming::Request(req) if req.method == methods::TOOLS_CALL => {
                self.spawn_call(req, out, inflight, tracker);
            },
            Incoming::Request(req) => {
                let resp = self.handle_request(req).await;
                send(out, resp);
            },
        }
    }

    fn spawn_call(
        &self,
        req: JsonRpcRequest,
        out: &Outbound,
        inflight: &InFlight,
        tracker: &TaskTracker,
    ) {
        let key = req.id.to_string();
        // Held until the handle is recorded so a fast task cannot finish first.
        let mut calls = lock(inflight);
        if calls.contains_key(&key) {
            send(
                out,
                JsonRpcResponse::failure(
                    req.id,
                    RpcError::invalid_request("request id is already in flight"),
                ),
            );
            return;
        }

        let methods = Arc::clone(&self.methods);
        let ctx = MethodContext {
            request_id: req.id,
            method: req.method,
            params: req.params.unwrap_or(Value::Null),
            state: Arc::clone(&self.state),
        };
        let id = ctx.request_id.clone();
        let out = out.clone();
        let task_inflight = Arc::clone(inflight);
        let task_key = key.clone();
        let handle = tracker.spawn(async move {
            let resp = methods.dispatch(ctx).await;
            // Whoever removes the entry owns the reply for this id.
            if lock(&task_inflight).remove(&task_key).is_some() {
                send(&out, resp);
            }
        });
        calls.insert(key, InFlightCall {
            id,
            abort: handle.abort_handle(),
        });
    }

    fn on_notification(&self, notification: JsonRpcNotification, inflight: &InFlight) {
        match notification.method.as_str() {
            methods::NOTIFY_INITIALIZED => info!("client confirmed initialization"),
            methods::NOTIFY_CANCELLED => {
                let params = notification.params.unwrap_or(Value::Null);
                let params: CancelledParams = match parse_params(&params) {
                    Ok(params) => params,
                    Err(e) => {
                        warn!(error = %e, "malformed cancellation");
                        return;
                    },
                };
                let key = params.request_id.to_string();
                match lock(inflight).remove(&key) {
                    Some(call) => {
                        call.abort.abort();
                        info!(request_id = %key, reason = ?params.reason, "request cancelled");
                    },
                    None => debug!(request_id = %key, "cancellation for a request not in flight"),
                }
            },
            other => debug!(method = other, "ignoring notification"),
        }
    }

    /// Log peer availability changes for this session.
    fn spawn_peer_watcher(&self) -> JoinHandle<()> {
        let mut rx = self.state.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(BridgeEvent::PeerAdmitted { peer_id, .. }) => {
                        info!(peer_id = %peer_id, "session: browser peer available");
                    },
                    Ok(BridgeEvent::PeerLost {
                        peer_id, reason, ..
                    }) => {
                        info!(peer_id = %peer_id, reason = %reason, "session: browser peer lost");
                    },
                    Ok(_) => {},
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "session: event watcher lagged");
                    },
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

fn send(out: &Outbound, response: JsonRpcResponse) {
    match serde_json::to_value(&response) {
        Ok(frame) => {
            if out.send(frame).is_err() {
                debug!("client writer gone, dropping response");
            }
        },
        Err(e) => error!(error = %e, "failed to encode response"),
    }
}

/// Abort calls that outlived the shutdown grace and answer them with an error.
fn abandon_in_flight(inflight: &InFlight, out: &Outbound) {
    let calls: Vec<InFlightCall> = lock(inflight).drain().map(|(_, call)| call).collect();
    for call in calls {
        call.abort.abort();
        warn!(request_id = %call.id, "in-flight call abandoned at shutdown");
        send(
            out,
            JsonRpcResponse::failure(call.id, RpcError::internal("bridge is shutting down")),
        );
    }
}

fn lock(inflight: &InFlight) -> MutexGuard<'_, HashMap<String, InFlightCall>> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}
