use {
    serde_json::json,
    tabwire_catalog::ValidationError,
    tabwire_common::FromMessage,
    tabwire_protocol::RpcError,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] tabwire_transport::Error),

    #[error(transparent)]
    Peer(#[from] tabwire_peer::Error),

    #[error(transparent)]
    Catalog(#[from] tabwire_catalog::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

tabwire_common::impl_context!();

/// Client-visible form of an argument validation failure.
pub fn validation_rpc_error(err: &ValidationError) -> RpcError {
    let mut data = json!({ "kind": err.kind() });
    if let Some(field) = err.field() {
        data["field"] = json!(field);
    }
    RpcError::invalid_params(err.to_string()).with_data(data)
}

/// Decode method params, mapping failures to `-32602`.
pub fn parse_params<T: serde::de::DeserializeOwned>(
    params: &serde_json::Value,
) -> std::result::Result<T, RpcError> {
    serde_json::from_value(params.clone())
        .map_err(|e| RpcError::invalid_params(format!("invalid params: {e}")))
}
