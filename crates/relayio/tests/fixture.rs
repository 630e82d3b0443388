//! Test fixture: boots a real server on a local port and drives it with a
//! plain http client and raw websockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::{Buf, Bytes};
use futures::SinkExt;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioIo},
    service::TowerToHyperService,
};
use relayio::{adapter::Adapter, SocketIo, SocketIoBuilder};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// The engine handshake payload.
#[derive(Debug, Deserialize, PartialEq, PartialOrd)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    pub sid: String,
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub max_payload: u64,
}

/// Send one http request to the server, returning the raw body.
pub async fn send_req(port: u16, params: String, method: hyper::Method, body: Option<String>) -> String {
    let body = body
        .map(|b| Full::new(Bytes::from(b)))
        .unwrap_or_else(|| Full::new(Bytes::new()));
    let req = Request::builder()
        .method(method)
        .uri(format!("http://127.0.0.1:{port}/socket.io/?EIO=4&{params}"))
        .body(body)
        .unwrap();

    let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(HttpConnector::new());
    let mut res = client.request(req).await.unwrap();
    let body = res.body_mut().collect().await.unwrap().to_bytes();
    String::from_utf8(body.chunk().to_vec()).unwrap()
}

/// Open an engine session over polling and return its sid.
pub async fn create_polling_connection(port: u16) -> String {
    let body = send_req(port, "transport=polling".to_string(), hyper::Method::GET, None).await;
    let open_packet: OpenPacket = serde_json::from_str(&body[1..]).unwrap();
    open_packet.sid
}

/// Open a websocket to the server, optionally reusing a polling sid.
pub async fn create_ws_connection(
    port: u16,
    sid: Option<&str>,
) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
    let sid = sid.map(|sid| format!("&sid={sid}")).unwrap_or_default();
    tokio_tungstenite::connect_async(format!(
        "ws://127.0.0.1:{port}/socket.io/?EIO=4&transport=websocket{sid}"
    ))
    .await
    .unwrap()
    .0
}

/// Open a websocket and join the given namespace, returning the stream after
/// the connect reply.
pub async fn create_ws_socket(
    port: u16,
    ns: &str,
) -> WebSocketStream<MaybeTlsStream<TcpStream>> {
    use futures::StreamExt;
    let mut ws = create_ws_connection(port, None).await;
    // open packet
    assert_matching_text(ws.next().await, "0");
    let connect = match ns {
        "/" => "40{}".to_string(),
        ns => format!("40{ns},{{}}"),
    };
    ws.send(Message::Text(connect)).await.unwrap();
    // connect reply
    assert_matching_text(ws.next().await, "40");
    ws
}

fn assert_matching_text(
    msg: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    prefix: &str,
) {
    match msg {
        Some(Ok(Message::Text(text))) => {
            assert!(text.starts_with(prefix), "expected `{prefix}…`, got: {text}")
        }
        msg => panic!("expected a text frame, got: {msg:?}"),
    }
}

/// Boot a server with the default adapter.
pub async fn create_server(port: u16) -> SocketIo {
    create_server_with_builder(port, SocketIo::builder()).await
}

/// Boot a server from a custom builder, e.g. with another adapter.
pub async fn create_server_with_builder<A: Adapter>(
    port: u16,
    builder: SocketIoBuilder<A>,
) -> SocketIo<A> {
    let (svc, io) = builder.build_svc();

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let svc = TowerToHyperService::new(svc.clone());
            tokio::spawn(async move {
                hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .with_upgrades()
                    .await
                    .ok();
            });
        }
    });

    io
}
