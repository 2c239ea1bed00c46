//! Typed lifecycle events shared by the peer manager and protocol handlers.
//!
//! Every observer sees the same closed set of [`BridgeEvent`] variants, so a
//! payload is always known statically. The [`EventBus`] is a thin wrapper over
//! a `tokio::sync::broadcast` channel: publishing never blocks, and a lagging
//! subscriber loses old events instead of stalling the publisher.

use std::{fmt, net::SocketAddr};

use {
    serde::Serialize,
    tokio::sync::broadcast,
    tracing::trace,
};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Whether an operation ran inside the bridge or was delegated to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Local,
    Delegated,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Delegated => f.write_str("delegated"),
        }
    }
}

/// How a single `tools/call` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    Success,
    /// The operation ran but reported a failure (peer error, timeout, disconnect).
    Failed,
    /// Delegated operation answered with guidance because no peer is connected.
    PeerMissing,
    Rejected,
}

/// Why an admitted peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LossReason {
    SocketClosed,
    Disconnected,
    Superseded,
    Shutdown,
}

impl fmt::Display for LossReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SocketClosed => "socket closed",
            Self::Disconnected => "peer disconnected",
            Self::Superseded => "superseded by a newer peer",
            Self::Shutdown => "bridge shutting down",
        };
        f.write_str(s)
    }
}

/// Lifecycle notifications emitted by the bridge.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    ListenerStarted {
        addr: SocketAddr,
    },
    PeerConnecting {
        connection_id: String,
        remote_addr: SocketAddr,
    },
    PeerAdmitted {
        peer_id: String,
        version: String,
        connection_id: String,
        capabilities: serde_json::Map<String, serde_json::Value>,
    },
    PeerRejected {
        connection_id: String,
        reason: String,
    },
    PeerLost {
        peer_id: String,
        connection_id: String,
        reason: LossReason,
        failed_requests: usize,
    },
    PeerUnresponsive {
        peer_id: String,
        silent_for_ms: u64,
    },
    PeerStatus {
        peer_id: String,
        payload: serde_json::Value,
    },
    PeerTransportError {
        connection_id: String,
        message: String,
    },
    ClientConnected {
        client_name: String,
        client_version: String,
        protocol_version: String,
    },
    OperationExecuted {
        operation: String,
        execution: ExecutionKind,
        outcome: OperationOutcome,
        elapsed_ms: u64,
    },
    ClientDisconnected,
}

impl BridgeEvent {
    /// Short stable name, used as a tracing field.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ListenerStarted { .. } => "listener_started",
            Self::PeerConnecting { .. } => "peer_connecting",
            Self::PeerAdmitted { .. } => "peer_admitted",
            Self::PeerRejected { .. } => "peer_rejected",
            Self::PeerLost { .. } => "peer_lost",
            Self::PeerUnresponsive { .. } => "peer_unresponsive",
            Self::PeerStatus { .. } => "peer_status",
            Self::PeerTransportError { .. } => "peer_transport_error",
            Self::ClientConnected { .. } => "client_connected",
            Self::OperationExecuted { .. } => "operation_executed",
            Self::ClientDisconnected => "client_disconnected",
        }
    }

    /// True for events that change whether a peer is available.
    #[must_use]
    pub fn is_peer_transition(&self) -> bool {
        matches!(self, Self::PeerAdmitted { .. } | Self::PeerLost { .. })
    }
}

/// Fan-out channel for [`BridgeEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BridgeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current subscriber. Events published while
    /// nobody listens are dropped.
    pub fn publish(&self, event: BridgeEvent) {
        trace!(event = event.name(), "publishing bridge event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
