use tabwire_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no browser peer is connected")]
    NoPeerConnected,

    #[error("browser peer disconnected before answering")]
    PeerDisconnected,

    #[error("'{operation}' got no answer from the browser peer within {timeout_ms} ms")]
    DelegatedCallTimeout { operation: String, timeout_ms: u64 },

    #[error("'{operation}' failed in the browser: {message}")]
    Remote { operation: String, message: String },

    #[error("could not bind the peer listener on {host} (ports {first_port}..={last_port}): {source}")]
    ListenerBind {
        host: String,
        first_port: u16,
        last_port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("peer manager is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    /// The call never reached a live peer, or the peer went away under it.
    #[must_use]
    pub fn is_peer_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NoPeerConnected | Self::PeerDisconnected | Self::ShuttingDown
        )
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

tabwire_common::impl_context!();

/// Why a pending connection was refused admission.
///
/// The `Display` text is sent to the peer as the `connection-rejected` reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("handshake timeout")]
    Timeout,
    #[error("expected handshake, got {0}")]
    NotAHandshake(String),
    #[error("malformed handshake: {0}")]
    Malformed(String),
    #[error("handshake is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("connection closed before handshake")]
    Closed,
    #[error("bridge is shutting down")]
    ShuttingDown,
}

impl RejectReason {
    /// Whether the socket is still open enough to be told why.
    pub fn should_notify(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}
