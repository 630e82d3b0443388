//! Extractors for the [`connect`](crate::handler::ConnectHandler),
//! [`message`](crate::handler::MessageHandler) and
//! [`disconnect`](crate::handler::DisconnectHandler) handlers.
//!
//! * [`SocketRef`]: a reference to the current [`Socket`].
//! * [`Data<T>`]: the auth or event payload deserialized to `T`; extraction
//!   failure keeps the handler from running and reports the mismatch.
//! * [`TryData<T>`]: same, but hands the `Result` to the handler.
//! * [`Bin`]: the binary attachments of the event. It consumes the payload
//!   list, so it goes last.
//! * [`AckSender`]: answers the event's acknowledgement request.
//! * [`DisconnectReason`]: why the socket left the namespace.
//!
//! Custom extractors implement [`FromConnectParts`], [`FromMessageParts`] /
//! [`FromMessage`] or [`FromDisconnectParts`].

use std::convert::Infallible;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    adapter::{Adapter, LocalAdapter},
    errors::{SendError, SocketError},
    handler::{FromConnectParts, FromDisconnectParts, FromMessage, FromMessageParts},
    packet::Packet,
    socket::{DisconnectReason, Socket},
};

/// A single-element array is unwrapped so single-argument events
/// deserialize directly to their type.
fn unwrap_array(v: &mut Value) {
    match v {
        Value::Array(vec) if vec.len() == 1 => {
            *v = vec.pop().unwrap();
        }
        _ => (),
    }
}

/// An extractor deserializing the auth or event payload to `T`. The handler
/// is not called if the deserialization fails.
pub struct Data<T: DeserializeOwned>(pub T);

impl<T, A> FromConnectParts<A> for Data<T>
where
    T: DeserializeOwned,
    A: Adapter,
{
    type Error = serde_json::Error;
    fn from_connect_parts(_: &Arc<Socket<A>>, auth: &Option<String>) -> Result<Self, Self::Error> {
        auth.as_ref()
            .map(|a| serde_json::from_str::<T>(a))
            .unwrap_or_else(|| serde_json::from_str::<T>("{}"))
            .map(Data)
    }
}

impl<T, A> FromMessageParts<A> for Data<T>
where
    T: DeserializeOwned,
    A: Adapter,
{
    type Error = serde_json::Error;
    fn from_message_parts(
        _: &Arc<Socket<A>>,
        v: &mut Value,
        _: &mut Vec<Vec<u8>>,
        _: &Option<i64>,
    ) -> Result<Self, Self::Error> {
        unwrap_array(v);
        serde_json::from_value(v.clone()).map(Data)
    }
}
impl<T, A> FromMessage<A> for Data<T>
where
    T: DeserializeOwned,
    A: Adapter,
{
    type Error = serde_json::Error;
    fn from_message(
        s: Arc<Socket<A>>,
        mut v: Value,
        mut p: Vec<Vec<u8>>,
        ack_id: Option<i64>,
    ) -> Result<Self, Self::Error> {
        Self::from_message_parts(&s, &mut v, &mut p, &ack_id)
    }
}

/// An extractor deserializing the auth or event payload to `T`, handing the
/// result to the handler.
pub struct TryData<T: DeserializeOwned>(pub Result<T, serde_json::Error>);

impl<T, A> FromConnectParts<A> for TryData<T>
where
    T: DeserializeOwned,
    A: Adapter,
{
    type Error = Infallible;
    fn from_connect_parts(_: &Arc<Socket<A>>, auth: &Option<String>) -> Result<Self, Infallible> {
        let v = auth
            .as_ref()
            .map(|a| serde_json::from_str(a))
            .unwrap_or_else(|| serde_json::from_str("{}"));
        Ok(TryData(v))
    }
}

impl<T, A> FromMessageParts<A> for TryData<T>
where
    T: DeserializeOwned,
    A: Adapter,
{
    type Error = Infallible;
    fn from_message_parts(
        _: &Arc<Socket<A>>,
        v: &mut Value,
        _: &mut Vec<Vec<u8>>,
        _: &Option<i64>,
    ) -> Result<Self, Infallible> {
        unwrap_array(v);
        Ok(TryData(serde_json::from_value(v.clone())))
    }
}
impl<T, A> FromMessage<A> for TryData<T>
where
    T: DeserializeOwned,
    A: Adapter,
{
    type Error = Infallible;
    fn from_message(
        s: Arc<Socket<A>>,
        mut v: Value,
        mut p: Vec<Vec<u8>>,
        ack_id: Option<i64>,
    ) -> Result<Self, Infallible> {
        Self::from_message_parts(&s, &mut v, &mut p, &ack_id)
    }
}

/// An extractor returning a reference to the current [`Socket`].
#[derive(Debug)]
pub struct SocketRef<A: Adapter = LocalAdapter>(Arc<Socket<A>>);

impl<A: Adapter> FromConnectParts<A> for SocketRef<A> {
    type Error = Infallible;
    fn from_connect_parts(s: &Arc<Socket<A>>, _: &Option<String>) -> Result<Self, Infallible> {
        Ok(SocketRef(s.clone()))
    }
}

impl<A: Adapter> FromMessageParts<A> for SocketRef<A> {
    type Error = Infallible;
    fn from_message_parts(
        s: &Arc<Socket<A>>,
        _: &mut Value,
        _: &mut Vec<Vec<u8>>,
        _: &Option<i64>,
    ) -> Result<Self, Infallible> {
        Ok(SocketRef(s.clone()))
    }
}
impl<A: Adapter> FromMessage<A> for SocketRef<A> {
    type Error = Infallible;
    fn from_message(
        s: Arc<Socket<A>>,
        _: Value,
        _: Vec<Vec<u8>>,
        _: Option<i64>,
    ) -> Result<Self, Infallible> {
        Ok(SocketRef(s))
    }
}

impl<A: Adapter> FromDisconnectParts<A> for SocketRef<A> {
    type Error = Infallible;
    fn from_disconnect_parts(
        s: &Arc<Socket<A>>,
        _: DisconnectReason,
    ) -> Result<Self, Infallible> {
        Ok(SocketRef(s.clone()))
    }
}

impl<A: Adapter> std::ops::Deref for SocketRef<A> {
    type Target = Socket<A>;
    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<A: Adapter> Clone for SocketRef<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: Adapter> PartialEq for SocketRef<A> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl<A: Adapter> From<Arc<Socket<A>>> for SocketRef<A> {
    fn from(socket: Arc<Socket<A>>) -> Self {
        Self(socket)
    }
}

impl<A: Adapter> SocketRef<A> {
    /// Disconnect the socket from its namespace.
    #[inline(always)]
    pub fn disconnect(self) -> Result<(), SocketError> {
        self.0.disconnect()
    }
}

/// An extractor returning the binary attachments of the event. Empty when
/// the event carried none.
pub struct Bin(pub Vec<Vec<u8>>);

impl<A: Adapter> FromMessage<A> for Bin {
    type Error = Infallible;
    fn from_message(
        _: Arc<Socket<A>>,
        _: Value,
        bin: Vec<Vec<u8>>,
        _: Option<i64>,
    ) -> Result<Self, Infallible> {
        Ok(Bin(bin))
    }
}

/// An extractor answering the acknowledgement request of the current event.
/// Sends nothing when the client did not ask for an ack.
#[derive(Debug)]
pub struct AckSender<A: Adapter = LocalAdapter> {
    binary: Vec<Vec<u8>>,
    socket: Arc<Socket<A>>,
    ack_id: Option<i64>,
}

impl<A: Adapter> FromMessageParts<A> for AckSender<A> {
    type Error = Infallible;
    fn from_message_parts(
        s: &Arc<Socket<A>>,
        _: &mut Value,
        _: &mut Vec<Vec<u8>>,
        ack_id: &Option<i64>,
    ) -> Result<Self, Infallible> {
        Ok(Self::new(s.clone(), *ack_id))
    }
}
impl<A: Adapter> FromMessage<A> for AckSender<A> {
    type Error = Infallible;
    fn from_message(
        s: Arc<Socket<A>>,
        _: Value,
        _: Vec<Vec<u8>>,
        ack_id: Option<i64>,
    ) -> Result<Self, Infallible> {
        Ok(Self::new(s, ack_id))
    }
}

impl<A: Adapter> AckSender<A> {
    pub(crate) fn new(socket: Arc<Socket<A>>, ack_id: Option<i64>) -> Self {
        Self {
            binary: vec![],
            socket,
            ack_id,
        }
    }

    /// Attach binary payloads to the ack response.
    pub fn bin(mut self, bin: Vec<Vec<u8>>) -> Self {
        self.binary = bin;
        self
    }

    /// Send the ack response to the client.
    pub fn send(self, data: impl Serialize) -> Result<(), SendError> {
        let Some(ack_id) = self.ack_id else {
            return Ok(());
        };
        let ns = self.socket.ns();
        let data = serde_json::to_value(data)?;
        let packet = if self.binary.is_empty() {
            Packet::ack(ns, data, ack_id)
        } else {
            Packet::bin_ack(ns, data, self.binary, ack_id)
        };
        self.socket.send(packet)
    }
}

impl<A: Adapter> FromDisconnectParts<A> for DisconnectReason {
    type Error = Infallible;
    fn from_disconnect_parts(
        _: &Arc<Socket<A>>,
        reason: DisconnectReason,
    ) -> Result<Self, Infallible> {
        Ok(reason)
    }
}
