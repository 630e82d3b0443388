//! Namespace connection scenarios, driven over real connections.

mod fixture;

use fixture::{create_polling_connection, create_server, create_ws_connection, send_req};
use futures::{SinkExt, StreamExt};
use relayio::extract::{Data, SocketRef};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn polling_connect_to_namespace() {
    const PORT: u16 = 21000;
    let io = create_server(PORT).await;
    io.ns("/foo", || {});

    let sid = create_polling_connection(PORT).await;

    let body = send_req(
        PORT,
        format!("transport=polling&sid={sid}"),
        hyper::Method::POST,
        Some("40/foo,{\"token\":\"x\"}".to_string()),
    )
    .await;
    assert_eq!(body, "ok");

    let body = send_req(
        PORT,
        format!("transport=polling&sid={sid}"),
        hyper::Method::GET,
        None,
    )
    .await;
    // engine `4` message framing + socket.io `40/foo,` connect reply
    assert!(
        body.starts_with("440/foo,{\"sid\":\""),
        "unexpected connect reply: {body}"
    );
    assert!(body.ends_with("\"}"));
}

#[tokio::test]
async fn connect_to_unknown_namespace_is_refused() {
    const PORT: u16 = 21001;
    let io = create_server(PORT).await;
    io.ns("/", || {});

    let sid = create_polling_connection(PORT).await;
    send_req(
        PORT,
        format!("transport=polling&sid={sid}"),
        hyper::Method::POST,
        Some("40/bar,".to_string()),
    )
    .await;

    let body = send_req(
        PORT,
        format!("transport=polling&sid={sid}"),
        hyper::Method::GET,
        None,
    )
    .await;
    assert_eq!(body, "44/bar,{\"message\":\"Invalid namespace\"}");
}

#[tokio::test]
async fn accept_any_namespace_connects_lazily() {
    const PORT: u16 = 21002;
    let io = create_server(PORT).await;
    io.accept_any_namespace(|| {});

    let mut ws = create_ws_connection(PORT, None).await;
    ws.next().await; // open packet

    ws.send(Message::Text("40/anything,{}".to_string()))
        .await
        .unwrap();
    match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            assert!(text.starts_with("40/anything,{\"sid\":\""), "got: {text}")
        }
        msg => panic!("expected connect reply, got: {msg:?}"),
    }
}

#[tokio::test]
async fn middleware_can_refuse_the_connection() {
    use relayio::handler::ConnectHandler;

    const PORT: u16 = 21003;
    let io = create_server(PORT).await;

    fn check_token(s: SocketRef, Data(auth): Data<Value>) -> Result<(), &'static str> {
        let _ = s;
        match auth.get("token").and_then(Value::as_str) {
            Some("secret") => Ok(()),
            _ => Err("bad token"),
        }
    }
    io.ns("/private", (|| {}).with(check_token));

    let mut ws = create_ws_connection(PORT, None).await;
    ws.next().await; // open packet

    ws.send(Message::Text("40/private,{\"token\":\"nope\"}".to_string()))
        .await
        .unwrap();
    match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            assert_eq!(text, "4/private,{\"message\":\"bad token\"}")
        }
        msg => panic!("expected connect error, got: {msg:?}"),
    }

    // the same connection can retry with proper credentials
    ws.send(Message::Text("40/private,{\"token\":\"secret\"}".to_string()))
        .await
        .unwrap();
    match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            assert!(text.starts_with("40/private,{\"sid\":\""), "got: {text}")
        }
        msg => panic!("expected connect reply, got: {msg:?}"),
    }
}

#[tokio::test]
async fn socket_auto_joins_its_own_id_room() {
    const PORT: u16 = 21005;
    let io = create_server(PORT).await;
    let (tx, mut rx) = tokio::sync::mpsc::channel::<bool>(1);
    io.ns("/", move |socket: SocketRef| {
        let in_own_room = socket
            .rooms()
            .contains(&socket.id.to_string().into());
        tx.try_send(in_own_room).ok();
    });

    let mut ws = create_ws_connection(PORT, None).await;
    ws.next().await; // open packet
    ws.send(Message::Text("40{}".to_string())).await.unwrap();
    assert!(rx.recv().await.unwrap());
}

#[tokio::test]
async fn client_namespace_disconnect_keeps_connection() {
    const PORT: u16 = 21004;
    let io = create_server(PORT).await;
    let (tx, mut rx) = tokio::sync::mpsc::channel::<relayio::DisconnectReason>(1);
    io.ns("/", move |socket: SocketRef| {
        let tx = tx.clone();
        socket.on_disconnect(move |reason: relayio::DisconnectReason| {
            tx.try_send(reason).ok();
        });
    });

    let mut ws = create_ws_connection(PORT, None).await;
    ws.next().await; // open packet
    ws.send(Message::Text("40{}".to_string())).await.unwrap();
    ws.next().await; // connect reply

    // leave the namespace only
    ws.send(Message::Text("41".to_string())).await.unwrap();
    let reason = rx.recv().await.unwrap();
    assert_eq!(reason, relayio::DisconnectReason::ClientNSDisconnect);

    // engine connection is still alive: a new connect works
    ws.send(Message::Text("40{}".to_string())).await.unwrap();
    match ws.next().await {
        Some(Ok(Message::Text(text))) => assert!(text.starts_with("40{\"sid\":\"")),
        msg => panic!("expected connect reply, got: {msg:?}"),
    }
}
