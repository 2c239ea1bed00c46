use {
    serde_json::json,
    tabwire_common::BridgeEvent,
    tabwire_protocol::mcp::{
        InitializeParams, InitializeResult, ServerCapabilities, ToolsCapability, methods,
        negotiate_protocol_version,
    },
    tracing::info,
};

use {
    super::MethodRegistry,
    crate::{error::parse_params, state::SessionPhase},
};

pub(super) fn register(reg: &mut MethodRegistry) {
    // initialize
    reg.register(
        methods::INITIALIZE,
        Box::new(|ctx| {
            Box::pin(async move {
                let params: InitializeParams = parse_params(&ctx.params)?;
                let protocol_version = negotiate_protocol_version(&params.protocol_version);

                {
                    let mut session = ctx.state.session.write().await;
                    if let Some(previous) = session.client.replace(params.client_info.clone()) {
                        info!(
                            previous = %previous.name,
                            client = %params.client_info.name,
                            "re-initialize replaces client identity"
                        );
                    }
                    session.phase = SessionPhase::Ready;
                    session.protocol_version = Some(protocol_version.to_string());
                    session.client_capabilities = params.capabilities;
                }

                info!(
                    client = %params.client_info.name,
                    client_version = %params.client_info.version,
                    requested = %params.protocol_version,
                    protocol_version,
                    "client initialized"
                );
                ctx.state.events.publish(BridgeEvent::ClientConnected {
                    client_name: params.client_info.name,
                    client_version: params.client_info.version,
                    protocol_version: protocol_version.to_string(),
                });

                let result = InitializeResult {
                    protocol_version: protocol_version.to_string(),
                    capabilities: ServerCapabilities {
                        tools: Some(ToolsCapability {
                            list_changed: false,
                        }),
                        resources: Some(json!({})),
                        prompts: Some(json!({})),
                        logging: Some(json!({})),
                    },
                    server_info: ctx.state.server_info(),
                    instructions: ctx.state.config.instructions.clone(),
                };
                serde_json::to_value(result).map_err(|e| {
                    tabwire_protocol::RpcError::internal(e.to_string())
                })
            })
        }),
    );

    // ping
    reg.register(
        methods::PING,
        Box::new(|ctx| {
            Box::pin(async move { Ok(json!({ "uptimeMs": ctx.state.uptime_ms() })) })
        }),
    );
}
