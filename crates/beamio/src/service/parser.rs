//! Request classification and dispatch to the transports.

use std::{future::Future, str::FromStr, sync::Arc};

use http::{Method, Request, Response};

use crate::{
    body::ResponseBody,
    config::EngineConfig,
    engine::Engine,
    errors::Error,
    handler::EngineHandler,
    service::futures::ResponseFuture,
    sid::Sid,
    transport::{polling, ws},
};

/// Dispatch a request to the transport selected by its query string.
pub(crate) fn dispatch_req<F, H, ReqBody, ResBody>(
    req: Request<ReqBody>,
    engine: Arc<Engine<H>>,
) -> ResponseFuture<F, ResBody>
where
    ReqBody: http_body::Body + Send + Unpin + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: std::fmt::Debug,
    ResBody: Send + 'static,
    H: EngineHandler,
    F: Future,
{
    // Anything arriving after shutdown is a teapot.
    if engine.is_closed() {
        return ResponseFuture::empty_response(418);
    }

    match RequestInfo::parse(&req, &engine.config) {
        Ok(RequestInfo {
            sid: None,
            transport: TransportType::Polling,
            method: Method::GET,
            jsonp,
        }) => {
            if let Some(auth) = engine.config.authenticator.clone() {
                if !auth(req.headers()) {
                    return ResponseFuture::ready(ParseError::Forbidden.into());
                }
            }
            ResponseFuture::ready(
                polling::open_req(engine, req, jsonp).unwrap_or_else(Into::into),
            )
        }
        Ok(RequestInfo {
            sid: Some(sid),
            transport: TransportType::Polling,
            method: Method::GET,
            jsonp,
        }) => ResponseFuture::async_response(Box::pin(async move {
            polling::polling_req(engine, sid, jsonp)
                .await
                .unwrap_or_else(Into::into)
        })),
        Ok(RequestInfo {
            sid: Some(sid),
            transport: TransportType::Polling,
            method: Method::POST,
            ..
        }) => ResponseFuture::async_response(Box::pin(async move {
            polling::post_req(engine, sid, req)
                .await
                .unwrap_or_else(Into::into)
        })),
        Ok(RequestInfo {
            sid,
            transport: TransportType::Websocket,
            method: Method::GET,
            ..
        }) => ResponseFuture::ready(ws::new_req(engine, sid, req).unwrap_or_else(Into::into)),
        Err(e) => {
            tracing::debug!("error parsing query: {:?}", e);
            ResponseFuture::ready(e.into())
        }
        Ok(_info) => {
            tracing::debug!("invalid request: {:?}", _info);
            ResponseFuture::ready(ParseError::BadRequest.into())
        }
    }
}

/// Malformed or unsupported request query.
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("transport unknown")]
    UnknownTransport,
    #[error("bad handshake method")]
    BadHandshakeMethod,
    #[error("bad request")]
    BadRequest,
    #[error("forbidden")]
    Forbidden,
    #[error("unsupported protocol version")]
    UnsupportedProtocolVersion,
}

fn error_response<B>(body: &'static str) -> Response<ResponseBody<B>> {
    Response::builder()
        .status(400)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(ResponseBody::engine_response(body))
        .unwrap()
}

/// The protocol error table of the http surface.
impl<B> From<ParseError> for Response<ResponseBody<B>> {
    fn from(err: ParseError) -> Self {
        use ParseError::*;
        match err {
            UnknownTransport => {
                error_response("{\"code\":\"0\",\"message\":\"Transport unknown\"}")
            }
            BadHandshakeMethod => {
                error_response("{\"code\":\"2\",\"message\":\"Bad handshake method\"}")
            }
            BadRequest => error_response("{\"code\":\"3\",\"message\":\"Bad request\"}"),
            Forbidden => error_response("{\"code\":\"4\",\"message\":\"Forbidden\"}"),
            UnsupportedProtocolVersion => {
                error_response("{\"code\":\"5\",\"message\":\"Unsupported protocol version\"}")
            }
        }
    }
}

/// Runtime errors surfacing on the http layer.
impl<B> From<Error> for Response<ResponseBody<B>> {
    fn from(err: Error) -> Self {
        match err {
            Error::UnknownSessionId(_) => {
                error_response("{\"code\":\"1\",\"message\":\"Session ID unknown\"}")
            }
            Error::TransportMismatch => ParseError::BadRequest.into(),
            Error::HttpErrorResponse(code) => Response::builder()
                .status(code)
                .body(ResponseBody::empty_response())
                .unwrap(),
            e => {
                tracing::debug!("engine error on http layer: {:?}", e);
                Response::builder()
                    .status(500)
                    .body(ResponseBody::empty_response())
                    .unwrap()
            }
        }
    }
}

/// The transport requested in the query string.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportType {
    Polling = 0x01,
    Websocket = 0x02,
}

impl FromStr for TransportType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "polling" => Ok(TransportType::Polling),
            "websocket" => Ok(TransportType::Websocket),
            _ => Err(ParseError::UnknownTransport),
        }
    }
}
impl From<u8> for TransportType {
    fn from(t: u8) -> Self {
        match t {
            0x01 => TransportType::Polling,
            0x02 => TransportType::Websocket,
            _ => unreachable!("invalid transport bit"),
        }
    }
}
impl From<TransportType> for &'static str {
    fn from(t: TransportType) -> Self {
        match t {
            TransportType::Polling => "polling",
            TransportType::Websocket => "websocket",
        }
    }
}

/// The information extracted from the request query string.
#[derive(Debug)]
pub(crate) struct RequestInfo {
    /// The session id, absent on a handshake.
    pub sid: Option<Sid>,
    /// The requested transport.
    pub transport: TransportType,
    /// The request method.
    pub method: Method,
    /// The JSON-P callback index, when the client polls through a script tag.
    pub jsonp: Option<u32>,
}

impl RequestInfo {
    fn parse<B>(req: &Request<B>, config: &EngineConfig) -> Result<Self, ParseError> {
        use ParseError::*;
        let query = req.uri().query().ok_or(UnknownTransport)?;
        let value_of = |key: &str| {
            query
                .split('&')
                .find(|s| s.starts_with(key))
                .and_then(|s| s.split('=').nth(1))
        };

        let protocol = value_of("EIO=").ok_or(UnsupportedProtocolVersion)?;
        if protocol != "4" {
            return Err(UnsupportedProtocolVersion);
        }

        let sid = value_of("sid=").and_then(|s| s.parse().ok());

        let transport: TransportType = value_of("transport=")
            .ok_or(UnknownTransport)
            .and_then(|t| t.parse())?;

        if !config.allowed_transport(transport) {
            return Err(BadRequest);
        }

        let jsonp = value_of("j=").and_then(|j| j.parse().ok());

        let method = req.method().clone();
        if method != Method::GET && sid.is_none() {
            Err(BadHandshakeMethod)
        } else {
            Ok(RequestInfo {
                sid,
                transport,
                method,
                jsonp,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_request(path: &str) -> Request<()> {
        Request::get(path).body(()).unwrap()
    }

    #[test]
    fn request_info_polling() {
        let req = build_request("http://localhost:3000/engine.io/?EIO=4&transport=polling");
        let info = RequestInfo::parse(&req, &EngineConfig::default()).unwrap();
        assert_eq!(info.sid, None);
        assert_eq!(info.transport, TransportType::Polling);
        assert_eq!(info.method, Method::GET);
        assert_eq!(info.jsonp, None);
    }

    #[test]
    fn request_info_websocket_with_sid() {
        let req = build_request(
            "http://localhost:3000/engine.io/?EIO=4&transport=websocket&sid=AAAAAAAAAAAAAAAAAAAA",
        );
        let info = RequestInfo::parse(&req, &EngineConfig::default()).unwrap();
        assert_eq!(info.sid, Some("AAAAAAAAAAAAAAAAAAAA".parse().unwrap()));
        assert_eq!(info.transport, TransportType::Websocket);
        assert_eq!(info.method, Method::GET);
    }

    #[test]
    fn request_info_jsonp() {
        let req = build_request("http://localhost:3000/engine.io/?EIO=4&transport=polling&j=4");
        let info = RequestInfo::parse(&req, &EngineConfig::default()).unwrap();
        assert_eq!(info.jsonp, Some(4));
    }

    #[test]
    fn transport_unknown_err() {
        let req = build_request("http://localhost:3000/engine.io/?EIO=4&transport=grpc");
        let err = RequestInfo::parse(&req, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, ParseError::UnknownTransport));
    }

    #[test]
    fn unsupported_protocol_version() {
        let req = build_request("http://localhost:3000/engine.io/?EIO=3&transport=polling");
        let err = RequestInfo::parse(&req, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedProtocolVersion));
    }

    #[test]
    fn bad_handshake_method() {
        let req = Request::post("http://localhost:3000/engine.io/?EIO=4&transport=polling")
            .body(())
            .unwrap();
        let err = RequestInfo::parse(&req, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, ParseError::BadHandshakeMethod));
    }

    #[test]
    fn disallowed_transport() {
        let req = build_request("http://localhost:3000/engine.io/?EIO=4&transport=polling");
        let config = EngineConfig::builder()
            .transports([TransportType::Websocket])
            .build();
        let err = RequestInfo::parse(&req, &config).unwrap_err();
        assert!(matches!(err, ParseError::BadRequest));
    }
}
