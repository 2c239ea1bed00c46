//! Protocol Handler: the MCP side of the bridge.
//!
//! A [`ProtocolHandler`] serves one client session over a framed stream. It
//! validates tool calls against the catalog, runs local operations itself, and
//! forwards the rest to the browser peer through a [`PeerLink`].

pub mod envelope;
pub mod error;
pub mod handler;
pub mod link;
pub mod local;
pub mod methods;
pub mod state;

pub use {
    error::{Error, Result},
    handler::ProtocolHandler,
    link::PeerLink,
    methods::{MethodContext, MethodRegistry, MethodResult},
    state::{ServerState, Session, SessionPhase},
};
