//! Semantic validation of a loaded configuration.
//!
//! Parsing already guarantees the shape; this pass catches values that parse
//! fine but make the bridge misbehave (zero timers, inverted thresholds,
//! listeners exposed beyond loopback).

use std::net::IpAddr;

use crate::schema::TabwireConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "range", "timing", "security"
    pub category: &'static str,
    /// Dotted path, e.g. "peer.port"
    pub path: &'static str,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.severity, self.category, self.path, self.message
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: &'static str,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path,
            message: message.into(),
        });
    }
}

pub fn validate(config: &TabwireConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let peer = &config.peer;

    for (path, value) in [
        ("peer.heartbeat_interval_ms", peer.heartbeat_interval_ms),
        ("peer.liveness_timeout_ms", peer.liveness_timeout_ms),
        ("peer.handshake_timeout_ms", peer.handshake_timeout_ms),
        ("peer.request_timeout_ms", peer.request_timeout_ms),
    ] {
        if value == 0 {
            result.push(Severity::Error, "range", path, "must be greater than zero");
        }
    }

    if peer.heartbeat_interval_ms > 0 && peer.liveness_timeout_ms <= peer.heartbeat_interval_ms {
        result.push(
            Severity::Error,
            "timing",
            "peer.liveness_timeout_ms",
            format!(
                "liveness timeout ({}ms) must exceed the heartbeat interval ({}ms)",
                peer.liveness_timeout_ms, peer.heartbeat_interval_ms
            ),
        );
    }

    if peer.max_frame_bytes < 1024 {
        result.push(
            Severity::Error,
            "range",
            "peer.max_frame_bytes",
            "must be at least 1024 bytes",
        );
    }

    if peer.port == 0 && peer.max_port_retries > 0 {
        result.push(
            Severity::Warning,
            "range",
            "peer.max_port_retries",
            "ignored when peer.port is 0 (the OS picks a free port)",
        );
    }

    if u32::from(peer.port) + u32::from(peer.max_port_retries) > u32::from(u16::MAX) {
        result.push(
            Severity::Error,
            "range",
            "peer.max_port_retries",
            "port range runs past 65535",
        );
    }

    match peer.host.parse::<IpAddr>() {
        Ok(ip) if !ip.is_loopback() => result.push(
            Severity::Warning,
            "security",
            "peer.host",
            format!("{ip} is reachable from other machines; the peer socket is unauthenticated"),
        ),
        Ok(_) => {},
        Err(_) if peer.host != "localhost" => result.push(
            Severity::Warning,
            "security",
            "peer.host",
            format!("'{}' may resolve to a non-loopback address", peer.host),
        ),
        Err(_) => {},
    }

    if config.server.name.trim().is_empty() {
        result.push(Severity::Error, "range", "server.name", "must not be empty");
    }

    result
}
