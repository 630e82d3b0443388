//! Drives the engine service in-process and checks the http surface against
//! the protocol: handshake shape, error table, polling round-trips and the
//! post-shutdown teapot.

use std::sync::Arc;

use beamio::{
    handler::EngineHandler,
    service::EngineService,
    socket::{DisconnectReason, Socket},
};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{Method, Request};
use serde::Deserialize;
use tower::Service;

#[derive(Debug)]
struct EchoHandler;

impl EngineHandler for EchoHandler {
    type Data = ();

    fn on_connect(self: &Arc<Self>, _socket: Arc<Socket<()>>) {}
    fn on_disconnect(&self, _socket: Arc<Socket<()>>, _reason: DisconnectReason) {}

    fn on_message(&self, msg: String, socket: Arc<Socket<()>>) {
        socket.emit(msg).ok();
    }

    fn on_binary(&self, data: Vec<u8>, socket: Arc<Socket<()>>) {
        socket.emit_binary(data).ok();
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenPacket {
    sid: String,
    upgrades: Vec<String>,
    ping_interval: u64,
    ping_timeout: u64,
    max_payload: u64,
}

fn svc() -> EngineService<EchoHandler> {
    EngineService::new(Arc::new(EchoHandler))
}

async fn send(
    svc: &mut EngineService<EchoHandler>,
    method: Method,
    uri: &str,
    body: Option<&str>,
) -> (http::StatusCode, Option<String>, String) {
    let body = body
        .map(|b| Full::new(Bytes::from(b.to_string())))
        .unwrap_or_else(|| Full::new(Bytes::new()));
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(body)
        .unwrap();
    let res = svc.call(req).await.unwrap();
    let status = res.status();
    let content_type = res
        .headers()
        .get("Content-Type")
        .map(|v| v.to_str().unwrap().to_string());
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (
        status,
        content_type,
        String::from_utf8(body.to_vec()).unwrap(),
    )
}

async fn handshake(svc: &mut EngineService<EchoHandler>) -> OpenPacket {
    let (status, content_type, body) = send(
        svc,
        Method::GET,
        "http://localhost/engine.io/?EIO=4&transport=polling",
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(content_type.as_deref(), Some("text/plain; charset=UTF-8"));
    assert_eq!(&body[..1], "0");
    assert!(body.ends_with('}'));
    serde_json::from_str(&body[1..]).unwrap()
}

#[tokio::test]
async fn polling_handshake() {
    let mut svc = svc();
    let open = handshake(&mut svc).await;
    assert_eq!(open.sid.len(), 20);
    assert_eq!(open.upgrades, ["websocket"]);
    assert_eq!(open.ping_interval, 25000);
    assert_eq!(open.ping_timeout, 20000);
    assert_eq!(open.max_payload, 1024 * 1024);
}

#[tokio::test]
async fn polling_echo_roundtrip() {
    let mut svc = svc();
    let open = handshake(&mut svc).await;

    let (status, _, body) = send(
        &mut svc,
        Method::POST,
        &format!(
            "http://localhost/engine.io/?EIO=4&transport=polling&sid={}",
            open.sid
        ),
        Some("4hello\x1e4world"),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, "ok");

    let (status, _, body) = send(
        &mut svc,
        Method::GET,
        &format!(
            "http://localhost/engine.io/?EIO=4&transport=polling&sid={}",
            open.sid
        ),
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, "4hello\x1e4world");
}

#[tokio::test]
async fn jsonp_polling() {
    let mut svc = svc();
    let (status, content_type, body) = send(
        &mut svc,
        Method::GET,
        "http://localhost/engine.io/?EIO=4&transport=polling&j=2",
        None,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(
        content_type.as_deref(),
        Some("text/javascript; charset=UTF-8")
    );
    assert!(body.starts_with("___eio[2](\"0"), "body: {body}");
    assert!(body.ends_with("\");"));
}

#[tokio::test]
async fn error_table() {
    let mut svc = svc();

    let (status, _, body) = send(
        &mut svc,
        Method::GET,
        "http://localhost/engine.io/?EIO=4&transport=grpc",
        None,
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body, "{\"code\":\"0\",\"message\":\"Transport unknown\"}");

    let (status, _, body) = send(
        &mut svc,
        Method::GET,
        "http://localhost/engine.io/?EIO=4&transport=polling&sid=AAAAAAAAAAAAAAAAAAAA",
        None,
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body, "{\"code\":\"1\",\"message\":\"Session ID unknown\"}");

    let (status, _, body) = send(
        &mut svc,
        Method::POST,
        "http://localhost/engine.io/?EIO=4&transport=polling",
        Some(""),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body, "{\"code\":\"2\",\"message\":\"Bad handshake method\"}");

    let (status, _, body) = send(
        &mut svc,
        Method::GET,
        "http://localhost/engine.io/?EIO=2&transport=polling",
        None,
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(
        body,
        "{\"code\":\"5\",\"message\":\"Unsupported protocol version\"}"
    );
}

#[tokio::test]
async fn forbidden_handshake() {
    let handler = Arc::new(EchoHandler);
    let config = beamio::config::EngineConfig::builder()
        .authenticator(|headers| headers.contains_key("Authorization"))
        .build();
    let mut svc = EngineService::with_config(handler, config);

    let req = Request::builder()
        .method(Method::GET)
        .uri("http://localhost/engine.io/?EIO=4&transport=polling")
        .body(Empty::<Bytes>::new())
        .unwrap();
    let res = svc.call(req).await.unwrap();
    assert_eq!(res.status(), 400);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, "{\"code\":\"4\",\"message\":\"Forbidden\"}".as_bytes());

    let req = Request::builder()
        .method(Method::GET)
        .uri("http://localhost/engine.io/?EIO=4&transport=polling")
        .header("Authorization", "let me in")
        .body(Empty::<Bytes>::new())
        .unwrap();
    let res = svc.call(req).await.unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn teapot_after_shutdown() {
    let mut svc = svc();
    svc.engine().close();

    let (status, _, _) = send(
        &mut svc,
        Method::GET,
        "http://localhost/engine.io/?EIO=4&transport=polling",
        None,
    )
    .await;
    assert_eq!(status, 418);
}

#[tokio::test]
async fn non_engine_requests_hit_inner_service() {
    let mut svc = svc();
    let (status, _, _) = send(&mut svc, Method::GET, "http://localhost/other", None).await;
    assert_eq!(status, 404);
}
