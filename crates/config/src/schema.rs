//! Config schema types.

use std::time::Duration;

use {
    serde::{Deserialize, Serialize},
    tabwire_transport::Framing,
};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabwireConfig {
    pub server: ServerConfig,
    pub peer: PeerConfig,
}

/// Client-facing side: identity, framing, and peer-absence policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported in `initialize` and to the peer.
    pub name: String,
    pub framing: Framing,
    /// Fail delegated calls with an RPC error when no peer is admitted,
    /// instead of answering with connection guidance.
    pub strict_peer: bool,
    /// Optional usage hints returned from `initialize`.
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tabwire".into(),
            framing: Framing::default(),
            strict_peer: false,
            instructions: None,
        }
    }
}

/// Peer-facing listener, timers, and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_ms: u64,
    /// Silence longer than this marks the peer unresponsive (it is not evicted).
    pub liveness_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Successive ports tried after `port` when it is already in use.
    pub max_port_retries: u16,
    pub max_frame_bytes: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8765,
            heartbeat_interval_ms: 10_000,
            liveness_timeout_ms: 60_000,
            handshake_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_port_retries: 10,
            max_frame_bytes: 16 * 1024 * 1024,
        }
    }
}

impl PeerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: TabwireConfig = toml::from_str(
            r#"
            [peer]
            port = 9000

            [server]
            framing = "length-prefixed"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.peer.port, 9000);
        assert_eq!(cfg.peer.handshake_timeout_ms, 5_000);
        assert_eq!(cfg.server.framing, Framing::LengthPrefixed);
        assert_eq!(cfg.server.name, "tabwire");
    }

    #[test]
    fn durations_follow_millisecond_fields() {
        let cfg = PeerConfig {
            request_timeout_ms: 1_500,
            ..Default::default()
        };
        assert_eq!(cfg.request_timeout(), Duration::from_millis(1_500));
    }
}
