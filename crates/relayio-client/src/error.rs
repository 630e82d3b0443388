use tokio_tungstenite::tungstenite;

/// Client-side errors.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("websocket error: {0}")]
    Ws(#[from] Box<tungstenite::Error>),

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("unexpected handshake answer")]
    BadHandshake,

    #[error("unparsable packet received")]
    InvalidPacket,

    #[error("connection is closed")]
    Closed,

    #[error("error serializing payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("the server refused the namespace connection: {0}")]
    ConnectionRefused(String),

    #[error("acknowledgement timeout")]
    AckTimeout,

    #[error("reconnection attempts exhausted")]
    ReconnectFailed,
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::Ws(Box::new(err))
    }
}
