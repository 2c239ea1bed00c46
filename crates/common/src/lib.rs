//! Error context helpers and lifecycle events shared by the tabwire crates.

pub mod error;
pub mod events;

pub use {
    error::FromMessage,
    events::{BridgeEvent, EventBus, ExecutionKind, LossReason, OperationOutcome},
};

/// Milliseconds since the Unix epoch, saturating to zero on clock skew.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
