use beamio::{socket::DisconnectReason as EIoDisconnectReason, Sid};
use tokio::sync::oneshot;

/// Internal errors of the packet/dispatch pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("error serializing json packet: {0:?}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid packet type")]
    InvalidPacketType,

    #[error("invalid event name")]
    InvalidEventName,

    #[error("binary frame received while no binary packet was pending")]
    UnexpectedBinaryFrame,

    #[error("cannot find socket {0} in namespace")]
    SocketGone(Sid),
}

/// Fatal protocol errors terminate the underlying connection; the rest
/// survive.
impl From<&Error> for Option<EIoDisconnectReason> {
    fn from(err: &Error) -> Self {
        use Error::*;
        match err {
            Serialize(_) | InvalidPacketType | InvalidEventName | UnexpectedBinaryFrame => {
                Some(EIoDisconnectReason::ParseError)
            }
            SocketGone(_) => None,
        }
    }
}

/// State of the underlying connection send path.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SocketError {
    #[error("socket is closed")]
    Closed,
    #[error("internal packet buffer is full")]
    InternalChannelFull,
}

impl From<tokio::sync::mpsc::error::TrySendError<()>> for SocketError {
    fn from(err: tokio::sync::mpsc::error::TrySendError<()>) -> Self {
        match err {
            tokio::sync::mpsc::error::TrySendError::Full(()) => SocketError::InternalChannelFull,
            tokio::sync::mpsc::error::TrySendError::Closed(()) => SocketError::Closed,
        }
    }
}

/// Errors of the emit path.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    #[error("error serializing json packet: {0:?}")]
    Serialize(#[from] serde_json::Error),
    #[error("cannot send to socket: {0}")]
    Socket(#[from] SocketError),
    #[error("event name is reserved for the protocol")]
    ReservedEventName,
}

/// Errors yielded while waiting for an acknowledgement.
#[derive(thiserror::Error, Debug)]
pub enum AckError {
    /// The ack payload could not be deserialized into the expected type.
    #[error("error deserializing ack response: {0:?}")]
    Serde(#[from] serde_json::Error),

    /// The client did not answer before the ack timeout.
    #[error("ack timeout")]
    Timeout,

    /// The socket was closed before answering.
    #[error("socket closed before acknowledging: {0:?}")]
    Socket(#[from] SocketError),
}

impl From<oneshot::error::RecvError> for AckError {
    fn from(_: oneshot::error::RecvError) -> Self {
        AckError::Socket(SocketError::Closed)
    }
}

/// Errors raised while fanning a packet out to many sockets.
#[derive(thiserror::Error, Debug)]
pub enum BroadcastError {
    /// Sending failed for some recipients; the rest got the packet.
    #[error("sending error: {0:?}")]
    Send(Vec<SocketError>),
    #[error("error serializing json packet: {0:?}")]
    Serialize(#[from] serde_json::Error),
}

impl From<Vec<SocketError>> for BroadcastError {
    fn from(value: Vec<SocketError>) -> Self {
        Self::Send(value)
    }
}

/// Non-fatal dispatch failures, surfaced on the socket error channel
/// registered with [`Socket::on_error`](crate::socket::Socket::on_error).
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    /// The decoded event arguments did not match the handler signature.
    #[error("event \"{event}\" arguments do not match the handler signature: {message}")]
    ArityMismatch { event: String, message: String },

    /// An ack arrived for an id with no outstanding entry.
    #[error("received ack with unknown id: {0}")]
    UnknownAck(i64),
}
