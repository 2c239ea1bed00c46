use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use {
    serde_json::Value,
    tabwire_protocol::{JsonRpcResponse, RpcError, mcp::methods},
    tracing::{debug, warn},
};

use crate::state::{ServerState, SessionPhase};

mod lifecycle;
mod prompts;
mod resources;
mod tools;

pub use {prompts::builtin_prompts, resources::{CATALOG_URI, PEER_STATUS_URI}};

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every method handler.
pub struct MethodContext {
    pub request_id: Value,
    pub method: String,
    pub params: Value,
    pub state: Arc<ServerState>,
}

/// The result a method handler produces.
pub type MethodResult = Result<Value, RpcError>;

/// A boxed async method handler.
pub type HandlerFn =
    Box<dyn Fn(MethodContext) -> Pin<Box<dyn Future<Output = MethodResult> + Send>> + Send + Sync>;

/// Methods answered before the session is initialized.
const PRE_INIT_METHODS: &[&str] = &[methods::INITIALIZE, methods::PING];

// ── Registry ─────────────────────────────────────────────────────────────────

pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register_defaults();
        reg
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn has(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub async fn dispatch(&self, ctx: MethodContext) -> JsonRpcResponse {
        let method = ctx.method.clone();
        let request_id = ctx.request_id.clone();

        let Some(handler) = self.handlers.get(&method) else {
            warn!(method, "unknown method");
            return JsonRpcResponse::failure(request_id, RpcError::method_not_found(&method));
        };

        if !PRE_INIT_METHODS.contains(&method.as_str())
            && ctx.state.phase().await != SessionPhase::Ready
        {
            debug!(method, "rejected before initialize");
            return JsonRpcResponse::failure(request_id, RpcError::not_initialized(&method));
        }

        debug!(method, request_id = %request_id, "dispatching method");
        match handler(ctx).await {
            Ok(payload) => {
                debug!(method, request_id = %request_id, "method ok");
                JsonRpcResponse::success(request_id, payload)
            },
            Err(err) => {
                debug!(method, request_id = %request_id, code = err.code, msg = %err.message, "method error");
                JsonRpcResponse::failure(request_id, err)
            },
        }
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn register_defaults(&mut self) {
        lifecycle::register(self);
        tools::register(self);
        resources::register(self);
        prompts::register(self);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_client_method() {
        let names = MethodRegistry::new().method_names();
        assert_eq!(names, [
            "initialize",
            "ping",
            "prompts/get",
            "prompts/list",
            "resources/list",
            "resources/read",
            "tools/call",
            "tools/list",
        ]);
    }
}
