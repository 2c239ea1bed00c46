use {
    serde_json::{Value, json},
    tabwire_protocol::{
        RpcError,
        mcp::{
            ReadResourceParams, ReadResourceResult, ResourceContents, ResourceDef,
            ResourcesListResult, methods,
        },
    },
};

use {
    super::MethodRegistry,
    crate::{error::parse_params, state::ServerState},
};

pub const PEER_STATUS_URI: &str = "tabwire://peer/status";
pub const CATALOG_URI: &str = "tabwire://catalog";
const JSON_MIME: &str = "application/json";

fn resource_defs() -> Vec<ResourceDef> {
    vec![
        ResourceDef {
            uri: PEER_STATUS_URI.into(),
            name: "Browser peer status".into(),
            description: Some(
                "The connected browser extension, if any, and outstanding delegated calls.".into(),
            ),
            mime_type: Some(JSON_MIME.into()),
        },
        ResourceDef {
            uri: CATALOG_URI.into(),
            name: "Tool catalog".into(),
            description: Some("Every tool with its execution class and required fields.".into()),
            mime_type: Some(JSON_MIME.into()),
        },
    ]
}

fn read(state: &ServerState, uri: &str) -> Result<Value, RpcError> {
    match uri {
        PEER_STATUS_URI => Ok(state.link.status()),
        CATALOG_URI => Ok(state.catalog.summary()),
        other => Err(RpcError::invalid_params(format!("unknown resource: {other}"))
            .with_data(json!({ "uri": other }))),
    }
}

pub(super) fn register(reg: &mut MethodRegistry) {
    // resources/list
    reg.register(
        methods::RESOURCES_LIST,
        Box::new(|_ctx| {
            Box::pin(async move {
                serde_json::to_value(ResourcesListResult {
                    resources: resource_defs(),
                })
                .map_err(|e| RpcError::internal(e.to_string()))
            })
        }),
    );

    // resources/read
    reg.register(
        methods::RESOURCES_READ,
        Box::new(|ctx| {
            Box::pin(async move {
                let params: ReadResourceParams = parse_params(&ctx.params)?;
                let body = read(&ctx.state, &params.uri)?;
                let text = serde_json::to_string_pretty(&body)
                    .map_err(|e| RpcError::internal(e.to_string()))?;
                serde_json::to_value(ReadResourceResult {
                    contents: vec![ResourceContents {
                        uri: params.uri,
                        mime_type: Some(JSON_MIME.into()),
                        text,
                    }],
                })
                .map_err(|e| RpcError::internal(e.to_string()))
            })
        }),
    );
}
