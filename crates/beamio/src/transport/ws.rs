//! The websocket transport: one packet per frame.
//!
//! [`new_req`] answers the http upgrade and spawns the connection task.
//! A connection opened with an existing sid goes through the probe handshake
//! before the session swaps its transport; a connection without a sid is a
//! brand new session served over the websocket directly.

use std::sync::Arc;

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt, TryStreamExt,
};
use http::{header, request::Parts, HeaderValue, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinHandle,
};
use tokio_tungstenite::{
    tungstenite::{handshake::derive_accept_key, protocol::Role, Message},
    WebSocketStream,
};

use crate::{
    body::ResponseBody,
    config::EngineConfig,
    engine::Engine,
    errors::Error,
    handler::EngineHandler,
    packet::{OpenPacket, Packet},
    service::TransportType,
    sid::Sid,
    socket::{DisconnectReason, Socket},
};

fn ws_response<B>(ws_key: &HeaderValue) -> Result<Response<ResponseBody<B>>, http::Error> {
    let sec = derive_accept_key(ws_key.as_bytes())
        .parse::<HeaderValue>()
        .unwrap();
    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, HeaderValue::from_static("websocket"))
        .header(header::CONNECTION, HeaderValue::from_static("Upgrade"))
        .header(header::SEC_WEBSOCKET_ACCEPT, sec)
        .body(ResponseBody::empty_response())
}

/// `Parts` is not `Clone`; rebuild the pieces the socket keeps. The upgrade
/// extension stays with the original parts.
fn clone_parts(parts: &Parts) -> Parts {
    let mut req = Request::builder()
        .method(parts.method.clone())
        .uri(parts.uri.clone())
        .version(parts.version)
        .body(())
        .unwrap();
    *req.headers_mut() = parts.headers.clone();
    req.into_parts().0
}

/// Answer a websocket upgrade request and spawn the connection task.
///
/// With a sid in the query the connection is a transport upgrade for an
/// existing session, otherwise it opens a new one.
pub(crate) fn new_req<R, B, H: EngineHandler>(
    engine: Arc<Engine<H>>,
    sid: Option<Sid>,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error> {
    let (parts, _) = req.into_parts();
    let ws_key = parts
        .headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(Error::HttpErrorResponse(StatusCode::BAD_REQUEST))?
        .clone();
    let req_parts = clone_parts(&parts);

    let req = Request::from_parts(parts, ());
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(conn) => {
                let conn = TokioIo::new(conn);
                match on_init(engine, conn, sid, req_parts).await {
                    Ok(()) => tracing::debug!("ws closed"),
                    Err(e) => tracing::debug!("ws closed with error: {:?}", e),
                }
            }
            Err(e) => tracing::debug!("ws upgrade error: {}", e),
        }
    });

    Ok(ws_response(&ws_key)?)
}

/// Drive one websocket connection until it closes.
async fn on_init<H: EngineHandler, S>(
    engine: Arc<Engine<H>>,
    conn: S,
    sid: Option<Sid>,
    req_parts: Parts,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_init = move || WebSocketStream::from_raw_socket(conn, Role::Server, None);
    let (socket, ws) = if let Some(sid) = sid {
        match engine.get_socket(sid) {
            None => return Err(Error::UnknownSessionId(sid)),
            Some(socket) if socket.is_ws() => return Err(Error::UpgradeError),
            Some(socket) => {
                let mut ws = ws_init().await;
                socket.start_upgrade();
                let handshake = upgrade_handshake(&socket, &mut ws);
                match tokio::time::timeout(engine.config.upgrade_timeout, handshake).await {
                    Ok(Ok(())) => (socket, ws),
                    // Probe failed or timed out: discard the new transport,
                    // the session stays on polling.
                    Ok(Err(e)) => {
                        socket.cancel_upgrade();
                        ws.close(None).await.ok();
                        return Err(e);
                    }
                    Err(_) => {
                        tracing::debug!(?sid, "upgrade timed out");
                        socket.cancel_upgrade();
                        ws.close(None).await.ok();
                        return Err(Error::UpgradeError);
                    }
                }
            }
        }
    } else {
        let socket = engine.create_session(TransportType::Websocket, req_parts);
        tracing::debug!(sid = ?socket.id, "new websocket session");
        let mut ws = ws_init().await;
        init_handshake(socket.id, &mut ws, &engine.config).await?;
        socket.spawn_heartbeat(engine.config.ping_interval, engine.config.ping_timeout);
        (socket, ws)
    };

    let (tx, rx) = ws.split();
    let rx_handle = forward_to_socket(socket.clone(), tx);

    if let Err(ref e) = forward_to_handler(&engine, rx, &socket).await {
        tracing::debug!(sid = ?socket.id, "error handling packet: {:?}", e);
        if let Some(reason) = e.into() {
            engine.close_session(socket.id, reason);
        }
    } else {
        engine.close_session(socket.id, DisconnectReason::TransportClose);
    }
    rx_handle.abort();
    Ok(())
}

/// Forward frames received on the websocket to the engine handler.
async fn forward_to_handler<H: EngineHandler, S>(
    engine: &Arc<Engine<H>>,
    mut rx: SplitStream<WebSocketStream<S>>,
    socket: &Arc<Socket<H::Data>>,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let max_payload = engine.config.max_payload;
    while let Some(msg) = rx.try_next().await? {
        match msg {
            Message::Text(msg) => {
                if msg.len() as u64 > max_payload {
                    return Err(Error::PayloadTooLarge);
                }
                match Packet::try_from(msg)? {
                    Packet::Close => {
                        tracing::debug!(sid = ?socket.id, "client terminated the session");
                        engine.close_session(socket.id, DisconnectReason::ClientTermination);
                        break;
                    }
                    Packet::Pong | Packet::Ping => socket
                        .heartbeat_tx
                        .try_send(())
                        .map_err(|_| Error::HeartbeatTimeout),
                    Packet::Message(msg) => {
                        engine.handler.on_message(msg, socket.clone());
                        Ok(())
                    }
                    p => return Err(Error::BadPacket(p)),
                }
            }
            Message::Binary(data) => {
                if data.len() as u64 > max_payload {
                    return Err(Error::PayloadTooLarge);
                }
                engine.handler.on_binary(data, socket.clone());
                Ok(())
            }
            Message::Close(_) => break,
            // Ws-level ping/pong frames are answered by tungstenite itself.
            _ => Ok(()),
        }?
    }
    Ok(())
}

/// Drain the connection queue into the websocket.
///
/// The sink is only flushed when the queue is empty so consecutive packets
/// coalesce into one syscall.
fn forward_to_socket<D, S>(
    socket: Arc<Socket<D>>,
    mut tx: SplitSink<WebSocketStream<S>, Message>,
) -> JoinHandle<()>
where
    D: Default + Send + Sync + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut internal_rx = socket.internal_rx.lock().await;

        'main: while let Some(batch) = internal_rx.recv().await {
            // Coalesce whatever else is already queued into this write.
            let mut batches = vec![batch];
            while let Ok(batch) = internal_rx.try_recv() {
                batches.push(batch);
            }
            for packet in batches.into_iter().flatten() {
                let res = match packet {
                    Packet::Binary(bin) => tx.feed(Message::Binary(bin)).await,
                    Packet::Close => {
                        tx.send(Message::Close(None)).await.ok();
                        internal_rx.close();
                        break 'main;
                    }
                    // A noop queued for a polling request that was never
                    // polled; pointless on a websocket.
                    Packet::Noop => Ok(()),
                    packet => {
                        let packet: String = packet.try_into().unwrap();
                        tx.feed(Message::Text(packet)).await
                    }
                };
                if let Err(_e) = res {
                    tracing::debug!(sid = ?socket.id, "error sending packet: {}", _e);
                }
            }
            tx.flush().await.ok();
        }
    })
}

/// Send the handshake on a fresh websocket session.
async fn init_handshake<S>(
    sid: Sid,
    ws: &mut WebSocketStream<S>,
    config: &EngineConfig,
) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let packet = Packet::Open(OpenPacket::new(TransportType::Websocket, sid, config));
    ws.send(Message::Text(packet.try_into()?)).await?;
    Ok(())
}

/// Probe handshake upgrading a polling session to this websocket:
///
/// ```text
/// CLIENT                                                 SERVER
///│   GET /engine.io/?EIO=4&transport=websocket&sid=...  │
///│ ───────────────────────────────────────────────────► │
///│  ◄─────────────────────────────────────────────────┘ │
///│            HTTP 101 (websocket handshake)            │
///│  ─────────────────────────────────────────────────►  │
///│                         2probe                       │
///│  ◄─────────────────────────────────────────────────  │
///│                         3probe                       │
///│  ─────────────────────────────────────────────────►  │
///│                         5                            │
/// ```
///
/// A noop is queued on the polling transport right away so the held GET
/// returns and the client can commit the upgrade.
async fn upgrade_handshake<D, S>(
    socket: &Arc<Socket<D>>,
    ws: &mut WebSocketStream<S>,
) -> Result<(), Error>
where
    D: Default + Send + Sync + 'static,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tracing::debug!(sid = ?socket.id, "websocket upgrade handshake");

    socket.send(Packet::Noop)?;

    let msg = match ws.next().await {
        Some(Ok(Message::Text(msg))) => msg,
        _ => return Err(Error::UpgradeError),
    };
    match Packet::try_from(msg)? {
        Packet::PingProbe => {
            ws.send(Message::Text(Packet::PongProbe.try_into()?)).await?;
        }
        p => return Err(Error::BadPacket(p)),
    };

    let msg = match ws.next().await {
        Some(Ok(Message::Text(msg))) => msg,
        _ => {
            tracing::debug!(sid = ?socket.id, "ws stream ended before upgrade");
            return Err(Error::UpgradeError);
        }
    };
    match Packet::try_from(msg)? {
        Packet::Upgrade => tracing::debug!(sid = ?socket.id, "websocket upgraded"),
        p => return Err(Error::BadPacket(p)),
    };

    // Wait for any in-flight polling request to finish draining, then make
    // this websocket the authoritative transport.
    let _ = socket.internal_rx.lock().await;
    socket.upgrade_to_websocket();
    Ok(())
}
