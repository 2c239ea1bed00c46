use std::time::Instant;

use {
    serde_json::{Map, Value, json},
    tabwire_catalog::{ExecutionKind, OperationDescriptor},
    tabwire_common::{BridgeEvent, OperationOutcome},
    tabwire_protocol::{
        RpcError,
        mcp::{ToolsCallParams, ToolsCallResult, ToolsListResult, methods},
    },
    tracing::{info, warn},
};

use {
    super::MethodRegistry,
    crate::{
        envelope,
        error::{parse_params, validation_rpc_error},
        local,
        state::ServerState,
    },
};

pub(super) fn register(reg: &mut MethodRegistry) {
    // tools/list
    reg.register(
        methods::TOOLS_LIST,
        Box::new(|ctx| {
            Box::pin(async move {
                let result = ToolsListResult {
                    tools: ctx.state.catalog.tool_defs(),
                };
                serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
            })
        }),
    );

    // tools/call
    reg.register(
        methods::TOOLS_CALL,
        Box::new(|ctx| {
            Box::pin(async move {
                let params: ToolsCallParams = parse_params(&ctx.params)?;
                let args = params
                    .arguments
                    .unwrap_or_else(|| Value::Object(Map::new()));
                let state = &ctx.state;
                let started = Instant::now();

                let op = match state.catalog.validate(&params.name, &args) {
                    Ok(op) => op,
                    Err(e) => {
                        warn!(tool = %params.name, error = %e, "tool arguments rejected");
                        let execution = state
                            .catalog
                            .get(&params.name)
                            .map_or(ExecutionKind::Delegated, |op| op.execution);
                        publish(state, &params.name, execution, OperationOutcome::Rejected, started);
                        return Err(validation_rpc_error(&e));
                    },
                };

                let outcome = match op.execution {
                    ExecutionKind::Local => local::execute(state, op, &args)
                        .await
                        .map(|r| (r, OperationOutcome::Success)),
                    ExecutionKind::Delegated => delegated(state, op, args).await,
                };
                let (result, status) = match outcome {
                    Ok(pair) => pair,
                    Err(err) => {
                        publish(state, &op.name, op.execution, OperationOutcome::Rejected, started);
                        return Err(err);
                    },
                };
                publish(state, &op.name, op.execution, status, started);
                serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
            })
        }),
    );
}

async fn delegated(
    state: &ServerState,
    op: &OperationDescriptor,
    args: Value,
) -> Result<(ToolsCallResult, OperationOutcome), RpcError> {
    if !state.link.is_connected() {
        return no_peer(state, op);
    }
    match state.link.delegate(&op.name, args).await {
        Ok(value) => Ok((envelope::from_peer_result(value), OperationOutcome::Success)),
        Err(tabwire_peer::Error::NoPeerConnected) => no_peer(state, op),
        Err(e)
            if e.is_peer_unavailable()
                || matches!(
                    e,
                    tabwire_peer::Error::Remote { .. }
                        | tabwire_peer::Error::DelegatedCallTimeout { .. }
                ) =>
        {
            warn!(tool = %op.name, error = %e, "delegated call failed");
            Ok((ToolsCallResult::error(e.to_string()), OperationOutcome::Failed))
        },
        Err(e) => Err(RpcError::internal(e.to_string())),
    }
}

/// No admitted peer: a hard error in strict mode, guidance text otherwise.
fn no_peer(
    state: &ServerState,
    op: &OperationDescriptor,
) -> Result<(ToolsCallResult, OperationOutcome), RpcError> {
    let endpoint = state
        .link
        .endpoint()
        .map(|addr| format!(" at ws://{addr}"))
        .unwrap_or_default();
    if state.config.strict_peer {
        info!(tool = %op.name, "no peer connected, strict mode");
        return Err(RpcError::peer_required(format!(
            "'{}' needs the browser extension, which is not connected{endpoint}",
            op.name
        ))
        .with_data(json!({ "operation": op.name })));
    }
    info!(tool = %op.name, "no peer connected, answering with guidance");
    let text = format!(
        "The browser extension is not connected, so '{}' could not run. \
         Open the browser with the tabwire extension enabled and let it connect{endpoint}, \
         then try again.",
        op.name
    );
    Ok((ToolsCallResult::text(text), OperationOutcome::PeerMissing))
}

fn publish(
    state: &ServerState,
    operation: &str,
    execution: ExecutionKind,
    outcome: OperationOutcome,
    started: Instant,
) {
    state.events.publish(BridgeEvent::OperationExecuted {
        operation: operation.to_string(),
        execution,
        outcome,
        elapsed_ms: started.elapsed().as_millis() as u64,
    });
}
