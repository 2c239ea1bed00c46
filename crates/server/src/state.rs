use std::{sync::Arc, time::Instant};

use {
    serde_json::Value,
    tabwire_catalog::Catalog,
    tabwire_common::EventBus,
    tabwire_config::ServerConfig,
    tabwire_protocol::mcp::Implementation,
    tokio::sync::RwLock,
};

use crate::link::PeerLink;

/// Where a client session stands. Only `initialize` and `ping` are served
/// before `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    Ready,
    Closed,
}

/// The single client session served by one handler instance.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub phase: SessionPhase,
    pub protocol_version: Option<String>,
    pub client: Option<Implementation>,
    pub client_capabilities: Value,
}

/// Shared state handed to every method handler.
pub struct ServerState {
    pub config: ServerConfig,
    pub catalog: Arc<Catalog>,
    pub link: Arc<dyn PeerLink>,
    pub events: EventBus,
    pub session: RwLock<Session>,
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        catalog: Arc<Catalog>,
        link: Arc<dyn PeerLink>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            catalog,
            link,
            events,
            session: RwLock::new(Session::default()),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub async fn phase(&self) -> SessionPhase {
        self.session.read().await.phase
    }

    pub fn server_info(&self) -> Implementation {
        Implementation {
            name: self.config.name.clone(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}
