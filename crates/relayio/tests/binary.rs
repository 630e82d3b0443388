//! Binary attachment reassembly, end to end.

mod fixture;

use fixture::{create_server, create_ws_socket};
use futures::{SinkExt, StreamExt};
use relayio::extract::{Bin, Data, SocketRef};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn binary_event_reaches_the_handler() {
    const PORT: u16 = 21200;
    let io = create_server(PORT).await;
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(Value, Vec<Vec<u8>>)>(1);
    io.ns("/foo", move |socket: SocketRef| {
        let tx = tx.clone();
        socket.on("image", move |Data(data): Data<Value>, Bin(bin): Bin| {
            tx.try_send((data, bin)).unwrap();
        });
    });

    let mut ws = create_ws_socket(PORT, "/foo").await;
    ws.send(Message::Text(
        "451-/foo,[\"image\",{\"_placeholder\":true,\"num\":0}]".to_string(),
    ))
    .await
    .unwrap();
    ws.send(Message::Binary(vec![0xDE, 0xAD, 0xBE, 0xEF]))
        .await
        .unwrap();

    let (data, bin) = rx.recv().await.unwrap();
    // the placeholder is stripped from the arguments
    assert_eq!(data, serde_json::json!([]));
    assert_eq!(bin, vec![vec![0xDE, 0xAD, 0xBE, 0xEF]]);
}

#[tokio::test]
async fn binary_event_is_emitted_with_attachments() {
    const PORT: u16 = 21201;
    let io = create_server(PORT).await;
    io.ns("/", |socket: SocketRef| {
        socket.on("echo-bin", |socket: SocketRef, Bin(bin): Bin| {
            socket.bin(bin).emit("echo-bin", "here").ok();
        });
    });

    let mut ws = create_ws_socket(PORT, "/").await;
    ws.send(Message::Text(
        "451-[\"echo-bin\",{\"_placeholder\":true,\"num\":0}]".to_string(),
    ))
    .await
    .unwrap();
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

    match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            assert_eq!(
                text,
                "451-[\"echo-bin\",\"here\",{\"_placeholder\":true,\"num\":0}]"
            );
        }
        msg => panic!("expected the primary frame, got: {msg:?}"),
    }
    match ws.next().await {
        Some(Ok(Message::Binary(bin))) => assert_eq!(bin, vec![1, 2, 3]),
        msg => panic!("expected the binary frame, got: {msg:?}"),
    }
}

#[tokio::test]
async fn stray_binary_frame_kills_the_connection() {
    const PORT: u16 = 21202;
    let io = create_server(PORT).await;
    io.ns("/", || {});

    let mut ws = create_ws_socket(PORT, "/").await;
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

    // the server closes the websocket
    loop {
        match ws.next().await {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
}
