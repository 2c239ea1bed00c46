#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Full bridge: MCP client on one side, a fake browser extension on a real
//! WebSocket on the other.

mod support;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    support::{Client, STEP, text_of},
    tabwire_common::EventBus,
    tabwire_config::{PeerConfig, ServerConfig},
    tabwire_peer::{PeerHandle, PeerHub},
    tabwire_transport::Framing,
    tokio::net::TcpStream,
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn hub() -> (PeerHandle, EventBus) {
    let events = EventBus::new();
    let config = PeerConfig {
        port: 0,
        max_port_retries: 0,
        request_timeout_ms: 2_000,
        ..Default::default()
    };
    let handle = PeerHub::new(config, events.clone()).acquire().await.unwrap();
    (handle, events)
}

async fn next_text(ws: &mut Socket) -> Value {
    loop {
        let msg = tokio::time::timeout(STEP, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(text.as_str()).unwrap();
            if value["type"] != "heartbeat" {
                return value;
            }
        }
    }
}

async fn extension(addr: SocketAddr) -> Socket {
    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.unwrap();
    assert_eq!(next_text(&mut ws).await["type"], "challenge");
    let handshake = json!({
        "type": "handshake",
        "peerId": "ext-1",
        "version": "2.0.0",
        "capabilities": {},
    });
    ws.send(Message::Text(handshake.to_string().into())).await.unwrap();
    assert_eq!(next_text(&mut ws).await["success"], true);
    ws
}

#[tokio::test]
async fn calls_travel_to_the_extension_and_back() {
    let (handle, events) = hub().await;
    let addr = handle.local_addr();
    let link: Arc<dyn tabwire_server::PeerLink> = Arc::new(handle.clone());
    let mut client =
        Client::start_with_events(Framing::LengthPrefixed, ServerConfig::default(), link, events);
    client.initialize().await;

    let mut ws = extension(addr).await;
    handle.wait_for_peer(STEP).await.unwrap();

    client
        .send(json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": {"name": "browser_navigate", "arguments": {"url": "https://example.com"}},
        }))
        .await;
    let request = next_text(&mut ws).await;
    assert_eq!(request["type"], "request");
    assert_eq!(request["operationName"], "browser_navigate");
    assert_eq!(request["args"]["url"], "https://example.com");

    let answer = json!({
        "type": "response",
        "requestId": request["requestId"],
        "success": true,
        "result": "Navigated to https://example.com",
    });
    ws.send(Message::Text(answer.to_string().into())).await.unwrap();

    let resp = client.recv().await;
    assert_eq!(resp["id"], 4);
    assert_eq!(text_of(&resp), "Navigated to https://example.com");

    let resp = client
        .request(5, "resources/read", json!({"uri": "tabwire://peer/status"}))
        .await;
    let status: Value =
        serde_json::from_str(resp["result"]["contents"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(status["connected"], true);
    assert_eq!(status["admitted"]["peer"]["peerId"], "ext-1");

    client.close().await.unwrap();
}

#[tokio::test]
async fn losing_the_extension_fails_the_call_as_a_tool_error() {
    let (handle, events) = hub().await;
    let addr = handle.local_addr();
    let link: Arc<dyn tabwire_server::PeerLink> = Arc::new(handle.clone());
    let mut client =
        Client::start_with_events(Framing::JsonLines, ServerConfig::default(), link, events);
    client.initialize().await;

    let mut ws = extension(addr).await;
    handle.wait_for_peer(STEP).await.unwrap();

    client
        .send(json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": {"name": "browser_snapshot", "arguments": {}},
        }))
        .await;
    assert_eq!(next_text(&mut ws).await["type"], "request");
    ws.close(None).await.unwrap();

    let resp = client.recv().await;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["result"]["isError"], true);

    tokio::time::timeout(STEP, async {
        while handle.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let resp = client.call(2, "browser_snapshot", json!({})).await;
    assert_eq!(resp["result"]["isError"], false);
    assert!(text_of(&resp).contains(&format!("ws://{addr}")));
}

#[tokio::test]
async fn shutdown_answers_the_call_the_extension_is_holding() {
    let (handle, events) = hub().await;
    let addr = handle.local_addr();
    let link: Arc<dyn tabwire_server::PeerLink> = Arc::new(handle.clone());
    let mut client =
        Client::start_with_events(Framing::JsonLines, ServerConfig::default(), link, events);
    client.initialize().await;

    let mut ws = extension(addr).await;
    handle.wait_for_peer(STEP).await.unwrap();

    client
        .send(json!({
            "jsonrpc": "2.0", "id": 7, "method": "tools/call",
            "params": {"name": "browser_snapshot", "arguments": {}},
        }))
        .await;
    assert_eq!(next_text(&mut ws).await["type"], "request");

    client.shutdown.cancel();
    let resp = client.recv().await;
    assert_eq!(resp["id"], 7);
    assert_eq!(resp["result"]["isError"], true);
    assert_eq!(handle.pending_requests(), 0);
    assert!(handle.is_shutting_down());

    client.stop().await.unwrap();
}
