//! The seam between the protocol handler and the peer manager.

use std::net::SocketAddr;

use {
    async_trait::async_trait,
    serde_json::Value,
    tabwire_peer::{PeerHandle, PeerSummary},
};

/// What a protocol handler needs from the peer side.
#[async_trait]
pub trait PeerLink: Send + Sync {
    fn is_connected(&self) -> bool;

    fn peer(&self) -> Option<PeerSummary>;

    /// Where the browser extension should connect.
    fn endpoint(&self) -> Option<SocketAddr>;

    fn status(&self) -> Value;

    /// Fail every outstanding delegated call and close the peer side. Called
    /// when the process is stopping.
    fn shutdown(&self);

    async fn delegate(&self, operation: &str, args: Value) -> tabwire_peer::Result<Value>;
}

#[async_trait]
impl PeerLink for PeerHandle {
    fn is_connected(&self) -> bool {
        !self.is_shutting_down() && (**self).is_connected()
    }

    fn peer(&self) -> Option<PeerSummary> {
        (**self).peer()
    }

    fn endpoint(&self) -> Option<SocketAddr> {
        Some(self.local_addr())
    }

    fn status(&self) -> Value {
        (**self).status()
    }

    fn shutdown(&self) {
        (**self).shutdown();
    }

    async fn delegate(&self, operation: &str, args: Value) -> tabwire_peer::Result<Value> {
        (**self).delegate(operation, args).await
    }
}
