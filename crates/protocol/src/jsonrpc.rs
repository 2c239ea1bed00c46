//! JSON-RPC 2.0 envelopes.

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

pub const JSONRPC_VERSION: &str = "2.0";

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A delegated operation was called in strict mode with no peer admitted.
    pub const PEER_REQUIRED: i64 = -32001;
    pub const NOT_INITIALIZED: i64 = -32002;
}

// ── Envelopes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }

    pub fn peer_required(message: impl Into<String>) -> Self {
        Self::new(error_codes::PEER_REQUIRED, message)
    }

    pub fn not_initialized(method: &str) -> Self {
        Self::new(
            error_codes::NOT_INITIALIZED,
            format!("session not initialized: call 'initialize' before '{method}'"),
        )
    }
}

// ── Classification ───────────────────────────────────────────────────────────

/// A decoded inbound frame, classified by shape.
#[derive(Debug, Clone)]
pub enum Incoming {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    /// A response from the client. We never issue requests, so these are dropped.
    Response(JsonRpcResponse),
}

impl Incoming {
    /// Classify a raw JSON document.
    ///
    /// On failure returns the id to answer with (`null` when unknown) and an
    /// `INVALID_REQUEST` error.
    pub fn from_value(value: Value) -> Result<Self, (Value, RpcError)> {
        let Some(obj) = value.as_object() else {
            return Err((
                Value::Null,
                RpcError::invalid_request("message must be a JSON object"),
            ));
        };
        let id = obj.get("id").cloned();
        let reply_id = id.clone().unwrap_or(Value::Null);

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err((
                reply_id,
                RpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        if let Some(method) = obj.get("method") {
            if !method.is_string() {
                return Err((reply_id, RpcError::invalid_request("method must be a string")));
            }
            return match id {
                None => serde_json::from_value(value)
                    .map(Incoming::Notification)
                    .map_err(|e| (Value::Null, RpcError::invalid_request(e.to_string()))),
                Some(Value::String(_) | Value::Number(_)) => serde_json::from_value(value)
                    .map(Incoming::Request)
                    .map_err(|e| (reply_id, RpcError::invalid_request(e.to_string()))),
                Some(_) => Err((
                    Value::Null,
                    RpcError::invalid_request("id must be a string or a number"),
                )),
            };
        }

        if obj.contains_key("result") || obj.contains_key("error") {
            return serde_json::from_value(value)
                .map(Incoming::Response)
                .map_err(|e| (reply_id, RpcError::invalid_request(e.to_string())));
        }

        Err((reply_id, RpcError::invalid_request("missing method")))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", Some(json!({"key": "val"})));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(json.contains("\"id\":1"));
    }

    #[test]
    fn failure_response_omits_result() {
        let resp = JsonRpcResponse::failure(json!("a"), RpcError::method_not_found("nope"));
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], error_codes::METHOD_NOT_FOUND);
        assert_eq!(v["id"], "a");
    }

    #[test]
    fn classifies_request_notification_and_response() {
        let req = Incoming::from_value(json!({"jsonrpc":"2.0","id":7,"method":"ping"})).unwrap();
        assert!(matches!(req, Incoming::Request(r) if r.method == "ping"));

        let note = Incoming::from_value(
            json!({"jsonrpc":"2.0","method":"notifications/initialized"}),
        )
        .unwrap();
        assert!(matches!(note, Incoming::Notification(_)));

        let resp = Incoming::from_value(json!({"jsonrpc":"2.0","id":1,"result":{}})).unwrap();
        assert!(matches!(resp, Incoming::Response(_)));
    }

    #[rstest]
    #[case(json!([1, 2]), json!(null))]
    #[case(json!({"jsonrpc":"1.0","id":3,"method":"ping"}), json!(3))]
    #[case(json!({"jsonrpc":"2.0","id":4,"method":12}), json!(4))]
    #[case(json!({"jsonrpc":"2.0","id":{"x":1},"method":"ping"}), json!(null))]
    #[case(json!({"jsonrpc":"2.0","id":5}), json!(5))]
    fn rejects_malformed_envelopes(#[case] input: Value, #[case] reply_id: Value) {
        let (id, err) = Incoming::from_value(input).unwrap_err();
        assert_eq!(id, reply_id);
        assert_eq!(err.code, error_codes::INVALID_REQUEST);
    }

    #[test]
    fn error_display_includes_code() {
        let err = RpcError::invalid_params("missing field 'url'");
        assert_eq!(err.to_string(), "missing field 'url' (code -32602)");
    }
}
