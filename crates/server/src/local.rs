//! Operations the bridge runs itself.

use std::time::Duration;

use {
    serde_json::{Value, json},
    tabwire_catalog::OperationDescriptor,
    tabwire_protocol::{RpcError, mcp::ToolsCallResult},
    tracing::debug,
};

use crate::state::ServerState;

pub async fn execute(
    state: &ServerState,
    op: &OperationDescriptor,
    args: &Value,
) -> Result<ToolsCallResult, RpcError> {
    match op.name.as_str() {
        "browser_wait" => {
            let ms = args
                .get("durationMs")
                .and_then(Value::as_f64)
                .unwrap_or_default()
                .max(0.0) as u64;
            debug!(ms, "waiting");
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ToolsCallResult::text(format!("Waited {ms} ms")))
        },
        "bridge_ping" => {
            let message = args.get("message").and_then(Value::as_str).unwrap_or("pong");
            Ok(ToolsCallResult::text(message))
        },
        "bridge_info" => Ok(ToolsCallResult::text(info(state).await)),
        other => Err(RpcError::internal(format!(
            "local operation '{other}' has no executor"
        ))),
    }
}

async fn info(state: &ServerState) -> String {
    let session = state.session.read().await.clone();
    let info = json!({
        "server": state.server_info(),
        "uptimeMs": state.uptime_ms(),
        "framing": state.config.framing,
        "strictPeer": state.config.strict_peer,
        "protocolVersion": session.protocol_version,
        "client": session.client,
        "peerEndpoint": state.link.endpoint().map(|a| format!("ws://{a}")),
        "peer": state.link.peer(),
        "operations": state.catalog.len(),
    });
    serde_json::to_string_pretty(&info).unwrap_or_else(|_| info.to_string())
}
