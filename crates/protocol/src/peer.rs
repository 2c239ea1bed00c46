//! Peer-facing socket protocol.
//!
//! One JSON object per WebSocket text frame, discriminated by `type`.
//!
//! ```text
//! bridge → peer   challenge, handshake-response, connection-rejected,
//!                 request, heartbeat, heartbeat-response
//! peer → bridge   handshake, response, heartbeat, heartbeat-response,
//!                 disconnect, error, status
//! ```

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// Fields a `handshake` must carry, announced in the `challenge`.
pub const HANDSHAKE_REQUIRED_FIELDS: &[&str] = &["peerId", "version", "capabilities"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

/// Sent immediately after a socket is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub required: Vec<String>,
    pub server: ServerIdentity,
    pub timeout_ms: u64,
}

/// First message a peer must send.
///
/// Fields are optional at the serde level so a missing one can be reported by
/// name instead of as a generic parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    pub success: bool,
    pub connection_id: String,
    pub server: ServerIdentity,
}

/// A delegated operation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedRequest {
    pub request_id: u64,
    pub operation_name: String,
    #[serde(default)]
    pub args: Value,
}

/// The peer's answer to a [`DelegatedRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegatedResponse {
    pub request_id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl DelegatedResponse {
    /// Human-readable failure text. Peers send either a string or an object
    /// with a `message` member.
    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(obj)) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
            Some(other) => other.to_string(),
            None => "operation failed without an error message".into(),
        }
    }
}

/// Every message exchanged on the peer socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    Challenge(Challenge),
    Handshake(Handshake),
    HandshakeResponse(HandshakeResponse),
    ConnectionRejected {
        reason: String,
    },
    Request(DelegatedRequest),
    Response(DelegatedResponse),
    Heartbeat {
        timestamp: u64,
    },
    HeartbeatResponse {
        timestamp: u64,
    },
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<Value>,
    },
    Status(Map<String, Value>),
}

impl PeerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The wire `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Challenge(_) => "challenge",
            Self::Handshake(_) => "handshake",
            Self::HandshakeResponse(_) => "handshake-response",
            Self::ConnectionRejected { .. } => "connection-rejected",
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Heartbeat { .. } => "heartbeat",
            Self::HeartbeatResponse { .. } => "heartbeat-response",
            Self::Disconnect { .. } => "disconnect",
            Self::Error { .. } => "error",
            Self::Status(_) => "status",
        }
    }
}
