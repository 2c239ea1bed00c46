#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Framed round trips over an in-memory duplex stream, for both disciplines.

use {
    futures::{SinkExt, StreamExt},
    serde_json::json,
    tabwire_transport::{DEFAULT_MAX_FRAME_BYTES, Framing, Inbound, split},
    tokio::io::AsyncWriteExt,
};

#[tokio::test]
async fn messages_survive_a_framed_round_trip() {
    for framing in Framing::ALL {
        let (client, server) = tokio::io::duplex(64);
        let (client_r, client_w) = tokio::io::split(client);
        let (server_r, server_w) = tokio::io::split(server);
        let (_, mut tx) = split(client_r, client_w, *framing, DEFAULT_MAX_FRAME_BYTES);
        let (mut rx, _) = split(server_r, server_w, *framing, DEFAULT_MAX_FRAME_BYTES);

        let big = "x".repeat(500);
        let messages = vec![
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": big}}),
        ];
        let expected = messages.clone();
        let writer = tokio::spawn(async move {
            for m in messages {
                tx.send(m).await.unwrap();
            }
        });

        for want in expected {
            let got = rx.next().await.unwrap().unwrap();
            assert_eq!(got, Inbound::Message(want), "framing {framing}");
        }
        writer.await.unwrap();
    }
}

#[tokio::test]
async fn json_lines_stream_ends_cleanly_on_eof() {
    let (mut client, server) = tokio::io::duplex(256);
    let (server_r, server_w) = tokio::io::split(server);
    let (mut rx, _) = split(server_r, server_w, Framing::JsonLines, 1024);

    client
        .write_all(b"{\"a\":1}\nnot json\n{\"b\":2}")
        .await
        .unwrap();
    drop(client);

    assert_eq!(rx.next().await.unwrap().unwrap(), Inbound::Message(json!({"a": 1})));
    assert_eq!(rx.next().await.unwrap().unwrap(), Inbound::Message(json!({"b": 2})));
    assert!(rx.next().await.is_none());
}
