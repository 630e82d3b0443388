//! Acknowledgement round-trips, both directions.

mod fixture;

use std::time::Duration;

use fixture::{create_server, create_ws_socket};
use futures::{SinkExt, StreamExt};
use relayio::extract::{AckSender, Data, SocketRef};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn client_requests_ack() {
    const PORT: u16 = 21100;
    let io = create_server(PORT).await;
    io.ns("/foo", |socket: SocketRef| {
        socket.on("ping", |ack: AckSender| {
            ack.send(("pong", 42)).ok();
        });
    });

    let mut ws = create_ws_socket(PORT, "/foo").await;
    ws.send(Message::Text("42/foo,12[\"ping\"]".to_string()))
        .await
        .unwrap();

    match ws.next().await {
        Some(Ok(Message::Text(text))) => assert_eq!(text, "43/foo,12[\"pong\",42]"),
        msg => panic!("expected an ack packet, got: {msg:?}"),
    }
}

#[tokio::test]
async fn server_requests_ack() {
    const PORT: u16 = 21101;
    let io = create_server(PORT).await;
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Result<Value, String>>(1);
    io.ns("/", move |socket: SocketRef| {
        let tx = tx.clone();
        tokio::spawn(async move {
            let ack = socket
                .timeout(Duration::from_secs(1))
                .emit_with_ack::<Value, _>("hand", "shake")
                .unwrap();
            let res = ack
                .await
                .map(|res| res.data)
                .map_err(|e| e.to_string());
            tx.send(res).await.ok();
        });
    });

    let mut ws = create_ws_socket(PORT, "/").await;
    match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            // `42<ack id>["hand","shake"]`
            assert!(text.starts_with("421") || text.starts_with("42"), "got: {text}");
            let ack_id: String = text
                .chars()
                .skip(2)
                .take_while(|c| c.is_ascii_digit())
                .collect();
            ws.send(Message::Text(format!("43{ack_id}[\"shaken\"]")))
                .await
                .unwrap();
        }
        msg => panic!("expected an event packet, got: {msg:?}"),
    }

    let res = rx.recv().await.unwrap().unwrap();
    assert_eq!(res, serde_json::json!(["shaken"]));
}

#[tokio::test]
async fn ack_timeout_without_answer() {
    const PORT: u16 = 21102;
    let io = create_server(PORT).await;
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(1);
    io.ns("/", move |socket: SocketRef| {
        let tx = tx.clone();
        tokio::spawn(async move {
            let res = socket
                .timeout(Duration::from_millis(100))
                .emit_with_ack::<Value, _>("hand", "shake")
                .unwrap()
                .await;
            tx.send(format!("{res:?}")).await.ok();
        });
    });

    let mut ws = create_ws_socket(PORT, "/").await;
    // receive the event, never answer
    ws.next().await;

    let res = rx.recv().await.unwrap();
    assert!(res.contains("Timeout"), "got: {res}");
}

#[tokio::test]
async fn broadcast_with_ack_counts_every_recipient() {
    const PORT: u16 = 21103;
    let io = create_server(PORT).await;
    io.ns("/", || {});

    let mut ws1 = create_ws_socket(PORT, "/").await;
    let mut ws2 = create_ws_socket(PORT, "/").await;

    let acks = io
        .of("/")
        .unwrap()
        .timeout(Duration::from_millis(300))
        .emit_with_ack::<Value, _>("poll", "data")
        .unwrap();

    // Both sockets receive the broadcast; only one answers, the other one
    // times out but still occupies its slot in the stream.
    match ws1.next().await {
        Some(Ok(Message::Text(text))) => {
            let ack_id: String = text
                .chars()
                .skip(2)
                .take_while(|c| c.is_ascii_digit())
                .collect();
            ws1.send(Message::Text(format!("43{ack_id}[\"yes\"]")))
                .await
                .unwrap();
        }
        msg => panic!("expected an event, got: {msg:?}"),
    }
    match ws2.next().await {
        Some(Ok(Message::Text(text))) => assert!(text.starts_with("42"), "got: {text}"),
        msg => panic!("expected an event, got: {msg:?}"),
    }

    let results: Vec<_> = acks.collect().await;
    assert_eq!(results.len(), 2);
    let answered = results.iter().filter(|(_, res)| res.is_ok()).count();
    let timed_out = results.iter().filter(|(_, res)| res.is_err()).count();
    assert_eq!(answered, 1);
    assert_eq!(timed_out, 1);
}
