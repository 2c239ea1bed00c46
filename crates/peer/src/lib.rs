//! Peer Connection Manager for the browser-extension side of the bridge.
//!
//! The peer connects over WebSocket, receives a `challenge`, and must answer
//! with a complete `handshake` before the handshake timeout. At most one peer
//! is admitted at a time; a new admission evicts the previous one. Delegated
//! operations are correlated to answers by request id, and a heartbeat probe
//! reports (but never evicts) a silent peer.
//!
//! [`PeerHub`] lets several protocol handlers share one listener.

mod connection;
pub mod error;
pub mod hub;
pub mod listener;
pub mod manager;

pub use {
    error::{Error, RejectReason, Result},
    hub::{PeerHandle, PeerHub, default_identity},
    listener::bind_with_retry,
    manager::{PeerManager, PeerSummary},
};
