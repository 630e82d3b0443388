//! The polling transport: GET drains the connection queue, POST ingests
//! client frames.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{header, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};

use crate::{
    body::ResponseBody,
    engine::Engine,
    errors::Error,
    handler::EngineHandler,
    packet::{OpenPacket, Packet},
    payload,
    service::TransportType,
    sid::Sid,
    socket::{DisconnectReason, Socket},
};

fn http_response<B, D>(
    code: StatusCode,
    data: D,
    content_type: &'static str,
) -> Result<Response<ResponseBody<B>>, http::Error>
where
    D: Into<Bytes>,
{
    let body: Bytes = data.into();
    Response::builder()
        .status(code)
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CONTENT_TYPE, content_type)
        .body(ResponseBody::engine_response(body))
}

fn payload_response<B>(
    data: String,
    jsonp: Option<u32>,
) -> Result<Response<ResponseBody<B>>, http::Error> {
    match jsonp {
        Some(j) => http_response(
            StatusCode::OK,
            payload::jsonp_wrap(j, &data),
            "text/javascript; charset=UTF-8",
        ),
        None => http_response(StatusCode::OK, data, "text/plain; charset=UTF-8"),
    }
}

/// Open a new session over polling and answer with the handshake.
pub(crate) fn open_req<H, B, R>(
    engine: Arc<Engine<H>>,
    req: Request<R>,
    jsonp: Option<u32>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineHandler,
    B: Send + 'static,
{
    let socket = engine.create_session(TransportType::Polling, req.into_parts().0);
    socket.spawn_heartbeat(engine.config.ping_interval, engine.config.ping_timeout);

    tracing::debug!(sid = ?socket.id, "new polling session");

    let packet = OpenPacket::new(TransportType::Polling, socket.id, &engine.config);
    let packet: String = Packet::Open(packet).try_into()?;
    payload_response(packet, jsonp).map_err(Error::Http)
}

/// Drain the connection queue into the http response.
///
/// Holds the request open up to `poll_timeout` when there is nothing to
/// send. Only one GET may be in flight: a concurrent one kills the session.
pub(crate) async fn polling_req<H, B>(
    engine: Arc<Engine<H>>,
    sid: Sid,
    jsonp: Option<u32>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineHandler,
    B: Send + 'static,
{
    let socket = engine.get_socket(sid).ok_or(Error::UnknownSessionId(sid))?;
    if !socket.is_http() {
        return Err(Error::TransportMismatch);
    }

    // Locked means another GET is already draining this session.
    let rx = match socket.internal_rx.try_lock() {
        Ok(rx) => rx,
        Err(_) => {
            socket.close(DisconnectReason::TransportError);
            return Err(Error::HttpErrorResponse(StatusCode::BAD_REQUEST));
        }
    };

    tracing::debug!(?sid, "polling request");
    let data = payload::encoder(rx, engine.config.max_payload, engine.config.poll_timeout).await?;

    tracing::debug!(?sid, "sending data: {:?}", data);
    payload_response(data, jsonp).map_err(Error::Http)
}

/// Ingest the frames of a POST body and feed them to the handler.
pub(crate) async fn post_req<H, R, B>(
    engine: Arc<Engine<H>>,
    sid: Sid,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineHandler,
    R: Body + Send + Unpin + 'static,
    R::Data: Send,
    R::Error: std::fmt::Debug,
    B: Send + 'static,
{
    let socket = engine.get_socket(sid).ok_or(Error::UnknownSessionId(sid))?;
    if !socket.is_http() {
        return Err(Error::TransportMismatch);
    }

    let is_form = req
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| {
            v.as_bytes()
                .starts_with(b"application/x-www-form-urlencoded")
        })
        .unwrap_or(false);

    if is_form {
        // JSON-P clients post `d=<urlencoded payload>`.
        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                tracing::debug!("error aggregating form body: {:?}", e);
                Error::Aborted
            })?
            .to_bytes();
        if body.len() as u64 > engine.config.max_payload {
            engine.close_session(sid, DisconnectReason::ParseError);
            return Err(Error::PayloadTooLarge);
        }
        let raw = payload::jsonp_unwrap(&body)?;
        let packets = payload::decoder(Full::new(Bytes::from(raw)), engine.config.max_payload);
        forward_packets(&engine, &socket, packets).await?;
    } else {
        let packets = payload::decoder(req.into_body(), engine.config.max_payload);
        forward_packets(&engine, &socket, packets).await?;
    }

    Ok(http_response(
        StatusCode::OK,
        "ok",
        "text/plain; charset=UTF-8",
    )?)
}

async fn forward_packets<H: EngineHandler>(
    engine: &Arc<Engine<H>>,
    socket: &Arc<Socket<H::Data>>,
    packets: impl Stream<Item = Result<Packet, Error>>,
) -> Result<(), Error> {
    let sid = socket.id;
    futures::pin_mut!(packets);

    while let Some(packet) = packets.next().await {
        match packet {
            Ok(Packet::Close) => {
                tracing::debug!(?sid, "client terminated the session");
                socket.send(Packet::Noop).ok();
                engine.close_session(sid, DisconnectReason::ClientTermination);
                break;
            }
            Ok(Packet::Pong | Packet::Ping) => socket
                .heartbeat_tx
                .try_send(())
                .map_err(|_| Error::HeartbeatTimeout),
            Ok(Packet::Message(msg)) => {
                engine.handler.on_message(msg, socket.clone());
                Ok(())
            }
            Ok(Packet::Binary(data)) => {
                engine.handler.on_binary(data, socket.clone());
                Ok(())
            }
            Ok(p) => {
                tracing::debug!(?sid, "unexpected packet: {:?}", p);
                engine.close_session(sid, DisconnectReason::ParseError);
                Err(Error::BadPacket(p))
            }
            Err(e) => {
                tracing::debug!(?sid, "packet parse error: {:?}", e);
                engine.close_session(sid, DisconnectReason::ParseError);
                Err(e)
            }
        }?;
    }
    Ok(())
}
