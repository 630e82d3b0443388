use crate::{packet::Packet, sid::Sid, socket::DisconnectReason};
use http::StatusCode;

/// All the errors that can happen in the engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("error serializing handshake packet: {0:?}")]
    Serialize(#[from] serde_json::Error),
    #[error("error decoding binary packet from polling payload: {0:?}")]
    Base64(#[from] base64::DecodeError),
    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("invalid packet type: {0:?}")]
    InvalidPacketType(Option<char>),
    #[error("packet received on an unexpected transport or state: {0:?}")]
    BadPacket(Packet),
    #[error("payload exceeds the max_payload limit")]
    PayloadTooLarge,
    #[error("frame is not valid utf-8")]
    InvalidUtf8,

    #[error("ws transport error: {0:?}")]
    WsTransport(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("http error: {0:?}")]
    Http(#[from] http::Error),

    #[error("internal channel full or closed")]
    SendChannel,
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
    #[error("upgrade error")]
    UpgradeError,
    #[error("aborted connection")]
    Aborted,

    #[error("unknown session id: {0}")]
    UnknownSessionId(Sid),
    #[error("transport mismatch for session")]
    TransportMismatch,
    #[error("http error response: {0:?}")]
    HttpErrorResponse(StatusCode),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WsTransport(Box::new(err))
    }
}

/// Fatal errors convert to the [`DisconnectReason`] reported to the handler;
/// a `None` conversion means the connection survives the error.
impl From<&Error> for Option<DisconnectReason> {
    fn from(err: &Error) -> Self {
        use Error::*;
        match err {
            WsTransport(_) | Io(_) => Some(DisconnectReason::TransportError),
            BadPacket(_) | Base64(_) | InvalidUtf8 | PayloadTooLarge | InvalidPacketType(_)
            | Serialize(_) => Some(DisconnectReason::ParseError),
            HeartbeatTimeout => Some(DisconnectReason::PingTimeout),
            _ => None,
        }
    }
}
