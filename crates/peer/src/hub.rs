//! Sharing one peer listener between several protocol handlers.

use std::{
    ops::Deref,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use {
    tabwire_common::EventBus,
    tabwire_config::PeerConfig,
    tabwire_protocol::ServerIdentity,
    tracing::{debug, info},
};

use crate::{error::Result, manager::PeerManager};

struct Slot {
    manager: Option<Arc<PeerManager>>,
    holders: usize,
}

struct HubInner {
    config: PeerConfig,
    server: ServerIdentity,
    events: EventBus,
    slot: Mutex<Slot>,
    // Serializes first-time startup so concurrent acquires bind once.
    init: tokio::sync::Mutex<()>,
}

impl HubInner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_join(self: &Arc<Self>) -> Option<PeerHandle> {
        let mut slot = self.slot();
        let manager = slot.manager.clone()?;
        slot.holders += 1;
        debug!(holders = slot.holders, "peer manager acquired");
        Some(PeerHandle {
            hub: Arc::clone(self),
            manager,
        })
    }

    fn release(&self, manager: &Arc<PeerManager>) {
        let last = {
            let mut slot = self.slot();
            slot.holders = slot.holders.saturating_sub(1);
            debug!(holders = slot.holders, "peer manager released");
            let same = slot
                .manager
                .as_ref()
                .is_some_and(|m| Arc::ptr_eq(m, manager));
            if slot.holders == 0 && same {
                slot.manager.take()
            } else {
                None
            }
        };
        if let Some(manager) = last {
            info!(addr = %manager.local_addr(), "last holder released, stopping peer manager");
            manager.shutdown();
        }
    }
}

/// Hands out reference-counted access to a single [`PeerManager`].
///
/// The first [`acquire`](Self::acquire) binds the listener; the manager is
/// shut down when the last [`PeerHandle`] drops. A later acquire starts a
/// fresh one.
#[derive(Clone)]
pub struct PeerHub {
    inner: Arc<HubInner>,
}

impl PeerHub {
    pub fn new(config: PeerConfig, events: EventBus) -> Self {
        Self::with_identity(config, default_identity(), events)
    }

    pub fn with_identity(config: PeerConfig, server: ServerIdentity, events: EventBus) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                server,
                events,
                slot: Mutex::new(Slot {
                    manager: None,
                    holders: 0,
                }),
                init: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub async fn acquire(&self) -> Result<PeerHandle> {
        if let Some(handle) = self.inner.try_join() {
            return Ok(handle);
        }
        let _init = self.inner.init.lock().await;
        if let Some(handle) = self.inner.try_join() {
            return Ok(handle);
        }

        let manager = PeerManager::start(
            self.inner.config.clone(),
            self.inner.server.clone(),
            self.inner.events.clone(),
        )
        .await?;
        {
            let mut slot = self.inner.slot();
            slot.manager = Some(Arc::clone(&manager));
            slot.holders = 1;
        }
        Ok(PeerHandle {
            hub: Arc::clone(&self.inner),
            manager,
        })
    }

    /// Number of live handles.
    pub fn holders(&self) -> usize {
        self.inner.slot().holders
    }

    pub fn is_running(&self) -> bool {
        self.inner.slot().manager.is_some()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}

/// A counted reference to the shared manager. Cloning acquires, dropping releases.
pub struct PeerHandle {
    hub: Arc<HubInner>,
    manager: Arc<PeerManager>,
}

impl PeerHandle {
    pub fn manager(&self) -> &Arc<PeerManager> {
        &self.manager
    }
}

impl Deref for PeerHandle {
    type Target = PeerManager;

    fn deref(&self) -> &PeerManager {
        &self.manager
    }
}

impl Clone for PeerHandle {
    fn clone(&self) -> Self {
        self.hub.slot().holders += 1;
        Self {
            hub: Arc::clone(&self.hub),
            manager: Arc::clone(&self.manager),
        }
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.hub.release(&self.manager);
    }
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("addr", &self.manager.local_addr())
            .finish_non_exhaustive()
    }
}

pub fn default_identity() -> ServerIdentity {
    ServerIdentity {
        name: "tabwire".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral() -> PeerConfig {
        PeerConfig {
            port: 0,
            max_port_retries: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn handles_share_one_listener() {
        let hub = PeerHub::new(ephemeral(), EventBus::new());
        let a = hub.acquire().await.unwrap();
        let b = hub.acquire().await.unwrap();
        let c = a.clone();
        assert_eq!(hub.holders(), 3);
        assert_eq!(a.local_addr(), b.local_addr());
        assert!(Arc::ptr_eq(a.manager(), c.manager()));

        drop(a);
        drop(c);
        assert_eq!(hub.holders(), 1);
        assert!(!b.is_shutting_down());

        let manager = Arc::clone(b.manager());
        drop(b);
        assert_eq!(hub.holders(), 0);
        assert!(!hub.is_running());
        assert!(manager.is_shutting_down());
    }

    #[tokio::test]
    async fn concurrent_first_acquires_bind_once() {
        let hub = PeerHub::new(ephemeral(), EventBus::new());
        let (a, b) = tokio::join!(hub.acquire(), hub.acquire());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(a.manager(), b.manager()));
        assert_eq!(hub.holders(), 2);
    }

    #[tokio::test]
    async fn reacquire_after_release_starts_fresh() {
        let hub = PeerHub::new(ephemeral(), EventBus::new());
        let first = hub.acquire().await.unwrap();
        let old = Arc::clone(first.manager());
        drop(first);
        let second = hub.acquire().await.unwrap();
        assert!(!Arc::ptr_eq(&old, second.manager()));
        assert!(!second.is_shutting_down());
    }
}
