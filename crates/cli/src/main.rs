mod config_commands;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::{Context, bail},
    clap::{Parser, Subcommand},
    tabwire_catalog::Catalog,
    tabwire_common::{BridgeEvent, EventBus},
    tabwire_config::{Framing, Severity, TabwireConfig},
    tabwire_peer::{PeerHandle, PeerHub, PeerSummary},
    tabwire_protocol::ServerIdentity,
    tabwire_server::ProtocolHandler,
    tabwire_transport::DEFAULT_MAX_FRAME_BYTES,
    tokio::sync::broadcast::{self, error::RecvError},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use config_commands::ConfigAction;

#[derive(Parser)]
#[command(
    name = "tabwire",
    version,
    about = "Tabwire: browser automation for MCP clients via a browser extension"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Shorthand for `--log-level debug`.
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (TOML or JSON). Discovered when omitted.
    #[arg(long, global = true, env = "TABWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Client framing (overrides config value).
    #[arg(long, global = true)]
    framing: Option<Framing>,

    /// Peer listener port (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Fail delegated calls with an error while no browser peer is connected.
    #[arg(long, global = true, default_value_t = false)]
    strict_peer: bool,

    /// Run only the peer listener, without a client on stdio.
    #[arg(long, global = true, default_value_t = false)]
    peer_only: bool,

    /// Hold back client traffic until a browser peer connects.
    #[arg(long, global = true, default_value_t = false)]
    wait_for_peer: bool,

    /// Upper bound for `--wait-for-peer`.
    #[arg(long, global = true, default_value_t = 30)]
    wait_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve MCP on stdio and accept the browser peer (default).
    Serve,
    /// Print the tool catalog as JSON.
    Catalog,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Logs go to stderr: stdout carries the client transport.
fn init_telemetry(cli: &Cli) {
    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(false),
            )
            .init();
    }
}

/// File, then `TABWIRE_*` env, then CLI flags.
fn load_config(cli: &Cli) -> anyhow::Result<TabwireConfig> {
    let mut config = tabwire_config::resolve(cli.config.as_deref())?;
    if let Some(framing) = cli.framing {
        config.server.framing = framing;
    }
    if let Some(port) = cli.port {
        config.peer.port = port;
    }
    if cli.strict_peer {
        config.server.strict_peer = true;
    }

    let result = tabwire_config::validate(&config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => error!(path = d.path, category = d.category, "{}", d.message),
            Severity::Warning => warn!(path = d.path, category = d.category, "{}", d.message),
        }
    }
    if result.has_errors() {
        bail!(
            "configuration has {} error(s)",
            result.count(Severity::Error)
        );
    }
    Ok(config)
}

fn spawn_event_logger(mut rx: broadcast::Receiver<BridgeEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event).unwrap_or_default();
                    if event.is_peer_transition() {
                        info!(event = event.name(), %payload, "bridge event");
                    } else {
                        debug!(event = event.name(), %payload, "bridge event");
                    }
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            },
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, listening for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            },
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Hold client intake until a browser peer is admitted, the wait window
/// closes, or shutdown is requested. Serving continues in every case.
async fn wait_for_peer_gate(
    peer: &PeerHandle,
    timeout: Duration,
    shutdown: &CancellationToken,
) -> Option<PeerSummary> {
    info!(?timeout, "waiting for a browser peer");
    tokio::select! {
        _ = shutdown.cancelled() => None,
        admitted = peer.wait_for_peer(timeout) => {
            match &admitted {
                Some(summary) => info!(peer_id = %summary.peer_id, "browser peer connected"),
                None => warn!("no browser peer within the wait window, continuing without one"),
            }
            admitted
        },
    }
}

async fn serve(cli: &Cli, config: TabwireConfig) -> anyhow::Result<()> {
    let events = EventBus::new();
    spawn_event_logger(events.subscribe());

    let identity = ServerIdentity {
        name: config.server.name.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
    };
    let hub = PeerHub::with_identity(config.peer.clone(), identity, events.clone());
    let peer: PeerHandle = hub.acquire().await.context("starting the peer listener")?;
    info!(addr = %peer.local_addr(), "peer listener ready");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    if cli.wait_for_peer {
        let timeout = Duration::from_secs(cli.wait_timeout_secs);
        wait_for_peer_gate(&peer, timeout, &shutdown).await;
    }

    let outcome = if cli.peer_only {
        info!("peer-only mode, no client transport");
        shutdown.cancelled().await;
        Ok(())
    } else {
        let framing = config.server.framing;
        let catalog = Arc::new(Catalog::builtin()?);
        let handler = ProtocolHandler::new(
            config.server,
            catalog,
            Arc::new(peer.clone()),
            events.clone(),
        );
        info!(%framing, "serving MCP on stdio");
        let (reader, writer) = tabwire_transport::stdio(framing, DEFAULT_MAX_FRAME_BYTES);
        handler.serve(reader, writer, shutdown.clone()).await
    };

    // No-op when the handler already shut the link; peer-only mode relies on it.
    peer.shutdown();
    drop(peer);
    match outcome {
        Ok(()) => {
            info!("tabwire stopped");
            Ok(())
        },
        Err(e) => Err(e).context("client transport failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match &cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "tabwire starting");
            let config = load_config(&cli)?;
            serve(&cli, config).await
        },
        Some(Commands::Catalog) => {
            let catalog = Catalog::builtin()?;
            println!("{}", serde_json::to_string_pretty(&catalog.summary())?);
            Ok(())
        },
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[test]
    fn bare_invocation_serves() {
        let cli = Cli::try_parse_from(["tabwire"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.peer_only);
        assert_eq!(cli.wait_timeout_secs, 30);
    }

    #[rstest]
    #[case("json-lines", Framing::JsonLines)]
    #[case("length-prefixed", Framing::LengthPrefixed)]
    fn framing_flag_parses(#[case] flag: &str, #[case] expected: Framing) {
        let cli = Cli::try_parse_from(["tabwire", "serve", "--framing", flag]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve)));
        assert_eq!(cli.framing, Some(expected));
    }

    #[test]
    fn unknown_framing_is_rejected() {
        assert!(Cli::try_parse_from(["tabwire", "--framing", "xml"]).is_err());
    }

    #[test]
    fn config_check_takes_global_flags() {
        let cli =
            Cli::try_parse_from(["tabwire", "config", "check", "--config", "tabwire.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Check
            })
        ));
        assert_eq!(cli.config, Some(PathBuf::from("tabwire.toml")));
    }

    async fn listening_peer() -> PeerHandle {
        let config = tabwire_config::PeerConfig {
            port: 0,
            max_port_retries: 0,
            ..Default::default()
        };
        PeerHub::new(config, EventBus::new()).acquire().await.unwrap()
    }

    #[tokio::test]
    async fn gate_returns_the_admitted_peer() {
        use {
            futures::{SinkExt, StreamExt},
            tokio_tungstenite::{connect_async, tungstenite::Message},
        };

        let peer = listening_peer().await;
        let url = format!("ws://{}", peer.local_addr());
        let extension = tokio::spawn(async move {
            let (mut ws, _) = connect_async(url).await.unwrap();
            let challenge = ws.next().await.unwrap().unwrap();
            assert!(challenge.to_text().unwrap().contains("challenge"));
            let handshake = serde_json::json!({
                "type": "handshake",
                "peerId": "ext-gate",
                "version": "1.4.0",
                "capabilities": {},
            });
            ws.send(Message::Text(handshake.to_string().into()))
                .await
                .unwrap();
            // Hold the socket open until the gate has observed admission.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let shutdown = CancellationToken::new();
        let admitted = wait_for_peer_gate(&peer, Duration::from_secs(5), &shutdown)
            .await
            .expect("peer should be admitted");
        assert_eq!(admitted.peer_id, "ext-gate");

        peer.shutdown();
        extension.abort();
    }

    #[tokio::test]
    async fn gate_gives_up_after_the_wait_window() {
        let peer = listening_peer().await;
        let shutdown = CancellationToken::new();
        let started = std::time::Instant::now();
        let admitted = wait_for_peer_gate(&peer, Duration::from_millis(100), &shutdown).await;
        assert!(admitted.is_none());
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!shutdown.is_cancelled());
        peer.shutdown();
    }

    #[tokio::test]
    async fn gate_yields_to_shutdown() {
        let peer = listening_peer().await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let admitted = tokio::time::timeout(
            Duration::from_secs(5),
            wait_for_peer_gate(&peer, Duration::from_secs(60), &shutdown),
        )
        .await
        .expect("gate should return once shutdown is requested");
        assert!(admitted.is_none());
        peer.shutdown();
    }
}
