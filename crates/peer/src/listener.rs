use std::io::ErrorKind;

use {
    tokio::net::TcpListener,
    tracing::{info, warn},
};

use crate::error::{Error, Result};

/// Bind `host:port`, stepping to the next port while the current one is taken.
///
/// At most `max_retries` extra ports are tried. Errors other than
/// address-in-use fail immediately.
pub async fn bind_with_retry(host: &str, port: u16, max_retries: u16) -> Result<TcpListener> {
    let last_port = port.saturating_add(max_retries);
    let mut last_error = None;

    for candidate in port..=last_port {
        match TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                if candidate != port {
                    info!(host, requested = port, port = candidate, "peer listener bound to fallback port");
                }
                return Ok(listener);
            },
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                warn!(host, port = candidate, "peer port in use, trying next");
                last_error = Some(e);
            },
            Err(source) => {
                return Err(Error::ListenerBind {
                    host: host.to_string(),
                    first_port: port,
                    last_port: candidate,
                    source,
                });
            },
        }
    }

    Err(Error::ListenerBind {
        host: host.to_string(),
        first_port: port,
        last_port,
        source: last_error.unwrap_or_else(|| ErrorKind::AddrInUse.into()),
    })
}
