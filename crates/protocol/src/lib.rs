//! Wire definitions for both sides of the bridge.
//!
//! - [`jsonrpc`]: JSON-RPC 2.0 envelopes and error codes used on the client side
//! - [`mcp`]: MCP method payloads (`initialize`, `tools/*`, `resources/*`, `prompts/*`)
//! - [`peer`]: the socket message set spoken with the browser extension

pub mod jsonrpc;
pub mod mcp;
pub mod peer;

pub use {
    jsonrpc::{
        Incoming, JSONRPC_VERSION, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RpcError,
        error_codes,
    },
    peer::{
        Challenge, DelegatedRequest, DelegatedResponse, Handshake, HandshakeResponse, PeerMessage,
        ServerIdentity,
    },
};
