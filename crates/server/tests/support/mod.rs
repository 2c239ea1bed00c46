//! An in-memory MCP client driving a [`ProtocolHandler`] over a duplex pipe.

#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tabwire_catalog::Catalog,
    tabwire_common::EventBus,
    tabwire_config::ServerConfig,
    tabwire_peer::PeerSummary,
    tabwire_server::{PeerLink, ProtocolHandler},
    tabwire_transport::{ClientReader, ClientWriter, DEFAULT_MAX_FRAME_BYTES, Framing, Inbound, split},
    tokio::{
        io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
};

pub const STEP: Duration = Duration::from_secs(5);

// ── Fake peer link ───────────────────────────────────────────────────────────

/// Answers delegated calls from a canned script and records what it was asked.
#[derive(Default)]
pub struct FakeLink {
    pub connected: AtomicBool,
    pub calls: Mutex<Vec<(String, Value)>>,
    pub replies: Mutex<Vec<(String, tabwire_peer::Result<Value>)>>,
    /// Set when a call that never answers is dropped.
    pub abandoned: Arc<AtomicBool>,
    pub stopped: CancellationToken,
}

impl FakeLink {
    pub fn connected() -> Arc<Self> {
        let link = Self::default();
        link.connected.store(true, Ordering::SeqCst);
        Arc::new(link)
    }

    pub fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, operation: &str, result: tabwire_peer::Result<Value>) {
        self.replies.lock().unwrap().push((operation.into(), result));
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

struct AbandonFlag(Arc<AtomicBool>);

impl Drop for AbandonFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn peer(&self) -> Option<PeerSummary> {
        None
    }

    fn endpoint(&self) -> Option<std::net::SocketAddr> {
        "127.0.0.1:61822".parse().ok()
    }

    fn status(&self) -> Value {
        json!({ "connected": self.is_connected() })
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.stopped.cancel();
    }

    async fn delegate(&self, operation: &str, args: Value) -> tabwire_peer::Result<Value> {
        self.calls.lock().unwrap().push((operation.into(), args));
        let scripted = {
            let mut replies = self.replies.lock().unwrap();
            replies
                .iter()
                .position(|(op, _)| op == operation)
                .map(|i| replies.remove(i).1)
        };
        match scripted {
            Some(result) => result,
            None => {
                let _flag = AbandonFlag(Arc::clone(&self.abandoned));
                self.stopped.cancelled().await;
                Err(tabwire_peer::Error::ShuttingDown)
            },
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct Client {
    pub framing: Framing,
    pub handler: Arc<ProtocolHandler>,
    reader: ClientReader<ReadHalf<DuplexStream>>,
    writer: ClientWriter<WriteHalf<DuplexStream>>,
    pub shutdown: CancellationToken,
    server: JoinHandle<tabwire_server::Result<()>>,
}

impl Client {
    pub fn start(framing: Framing, config: ServerConfig, link: Arc<dyn PeerLink>) -> Self {
        Self::start_with_events(framing, config, link, EventBus::new())
    }

    pub fn start_with_events(
        framing: Framing,
        config: ServerConfig,
        link: Arc<dyn PeerLink>,
        events: EventBus,
    ) -> Self {
        let catalog = Arc::new(Catalog::builtin().unwrap());
        let handler = Arc::new(ProtocolHandler::new(config, catalog, link, events));
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_r, server_w) = tokio::io::split(server_io);
        let (client_r, client_w) = tokio::io::split(client_io);
        let (server_reader, server_writer) =
            split(server_r, server_w, framing, DEFAULT_MAX_FRAME_BYTES);
        let (reader, writer) = split(client_r, client_w, framing, DEFAULT_MAX_FRAME_BYTES);

        let shutdown = CancellationToken::new();
        let serving = Arc::clone(&handler);
        let token = shutdown.clone();
        let server = tokio::spawn(async move {
            serving.serve(server_reader, server_writer, token).await
        });
        Self {
            framing,
            handler,
            reader,
            writer,
            shutdown,
            server,
        }
    }

    /// A client that has already completed `initialize`.
    pub async fn ready(framing: Framing, config: ServerConfig, link: Arc<dyn PeerLink>) -> Self {
        let mut client = Self::start(framing, config, link);
        client.initialize().await;
        client
    }

    pub async fn initialize(&mut self) -> Value {
        let resp = self
            .request(
                0,
                "initialize",
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "clientInfo": {"name": "harness", "version": "0.1.0"},
                }),
            )
            .await;
        self.notify("notifications/initialized", json!({})).await;
        resp
    }

    pub async fn send(&mut self, frame: Value) {
        self.writer.send(frame).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let io = self.writer.get_mut();
        io.write_all(bytes).await.unwrap();
        io.flush().await.unwrap();
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await;
    }

    pub async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(STEP, self.reader.next())
            .await
            .expect("no response from handler")
            .expect("handler closed the stream")
            .unwrap();
        match frame {
            Inbound::Message(value) => value,
            Inbound::Malformed(reason) => panic!("handler wrote a malformed frame: {reason}"),
        }
    }

    pub async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        let resp = self.recv().await;
        assert_eq!(resp["id"], id, "response for another request: {resp}");
        resp
    }

    pub async fn call(&mut self, id: i64, tool: &str, arguments: Value) -> Value {
        self.request(id, "tools/call", json!({"name": tool, "arguments": arguments}))
            .await
    }

    /// Close the client side and wait for the handler to finish.
    pub async fn close(self) -> tabwire_server::Result<()> {
        let Self {
            mut writer,
            reader,
            server,
            ..
        } = self;
        writer.close().await.unwrap();
        drop(writer);
        drop(reader);
        tokio::time::timeout(STEP, server).await.unwrap().unwrap()
    }

    pub async fn stop(self) -> tabwire_server::Result<()> {
        self.shutdown.cancel();
        tokio::time::timeout(STEP, self.server).await.unwrap().unwrap()
    }
}

/// First text block of a `tools/call` result.
pub fn text_of(resp: &Value) -> &str {
    resp["result"]["content"][0]["text"].as_str().unwrap_or_default()
}
