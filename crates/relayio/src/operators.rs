//! Chainable operators selecting broadcast recipients and configuring the
//! outgoing packet.
//!
//! [`ConfOperators`] configures an emit to the current socket;
//! [`BroadcastOperators`] selects recipients through the namespace adapter.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::{
    ack::AckStream,
    adapter::{Adapter, BroadcastFlags, BroadcastOptions, Room},
    errors::{BroadcastError, SendError},
    extract::SocketRef,
    ns::Namespace,
    packet::Packet,
    socket::{is_reserved_event, Socket},
};
use beamio::Sid;

/// Anything usable as one or several room names.
///
/// Implemented for strings, string vectors and arrays, [`Sid`] and `()`.
pub trait RoomParam: 'static {
    /// The iterator returned by [`into_room_iter`](RoomParam::into_room_iter).
    type IntoIter: Iterator<Item = Room>;

    fn into_room_iter(self) -> Self::IntoIter;
}

impl RoomParam for Room {
    type IntoIter = std::iter::Once<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(self)
    }
}
impl RoomParam for String {
    type IntoIter = std::iter::Once<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(Cow::Owned(self))
    }
}
impl RoomParam for &'static str {
    type IntoIter = std::iter::Once<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(Cow::Borrowed(self))
    }
}
impl RoomParam for Vec<Room> {
    type IntoIter = std::vec::IntoIter<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter()
    }
}
impl RoomParam for Vec<String> {
    type IntoIter = std::iter::Map<std::vec::IntoIter<String>, fn(String) -> Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Owned)
    }
}
impl RoomParam for Vec<&'static str> {
    type IntoIter = std::iter::Map<std::vec::IntoIter<&'static str>, fn(&'static str) -> Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Borrowed)
    }
}
impl<const COUNT: usize> RoomParam for [&'static str; COUNT] {
    type IntoIter =
        std::iter::Map<std::array::IntoIter<&'static str, COUNT>, fn(&'static str) -> Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Borrowed)
    }
}
impl<const COUNT: usize> RoomParam for [String; COUNT] {
    type IntoIter = std::iter::Map<std::array::IntoIter<String, COUNT>, fn(String) -> Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        self.into_iter().map(Cow::Owned)
    }
}
impl RoomParam for Sid {
    type IntoIter = std::iter::Once<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::once(Cow::Owned(self.to_string()))
    }
}
impl RoomParam for () {
    type IntoIter = std::iter::Empty<Room>;
    #[inline(always)]
    fn into_room_iter(self) -> Self::IntoIter {
        std::iter::empty()
    }
}

/// Operators configuring a message sent to the current socket.
pub struct ConfOperators<'a, A: Adapter> {
    binary: Vec<Vec<u8>>,
    timeout: Option<Duration>,
    socket: &'a Socket<A>,
}

impl<'a, A: Adapter> ConfOperators<'a, A> {
    pub(crate) fn new(socket: &'a Socket<A>) -> Self {
        Self {
            binary: vec![],
            timeout: None,
            socket,
        }
    }

    /// Attach binary payloads to the message.
    pub fn bin(mut self, binary: Vec<Vec<u8>>) -> Self {
        self.binary = binary;
        self
    }

    /// Override the ack timeout of `emit_with_ack`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Emit the message to the current socket.
    pub fn emit<T: Serialize>(
        self,
        event: impl Into<Cow<'static, str>>,
        data: T,
    ) -> Result<(), SendError> {
        let packet = self.prepare_packet(event, data)?;
        self.socket.send(packet)
    }

    /// Emit the message to the current socket and wait for its ack.
    pub fn emit_with_ack<V: DeserializeOwned, T: Serialize>(
        self,
        event: impl Into<Cow<'static, str>>,
        data: T,
    ) -> Result<AckStream<V>, SendError> {
        use crate::ack::AckInnerStream;
        let timeout = self.timeout.unwrap_or(self.socket.config.ack_timeout);
        let packet = self.prepare_packet(event, data)?;
        let rx = self
            .socket
            .send_with_ack(packet)
            .map_err(SendError::Socket)?;
        Ok(AckInnerStream::send(rx, timeout, self.socket.id).into())
    }

    fn prepare_packet<T: Serialize>(
        &self,
        event: impl Into<Cow<'static, str>>,
        data: T,
    ) -> Result<Packet<'static>, SendError> {
        let event = event.into();
        if is_reserved_event(&event) {
            return Err(SendError::ReservedEventName);
        }
        let ns = self.socket.ns.path.clone();
        let data = serde_json::to_value(data)?;
        let packet = if self.binary.is_empty() {
            Packet::event(ns, event, data)
        } else {
            Packet::bin_event(ns, event, data, self.binary.clone())
        };
        Ok(packet)
    }
}

/// Operators selecting broadcast recipients in a namespace.
pub struct BroadcastOperators<A: Adapter> {
    binary: Vec<Vec<u8>>,
    ns: Arc<Namespace<A>>,
    opts: BroadcastOptions,
}

impl<A: Adapter> BroadcastOperators<A> {
    pub(crate) fn from_ns(ns: Arc<Namespace<A>>) -> Self {
        let mut opts = BroadcastOptions::default();
        opts.flags.insert(BroadcastFlags::Broadcast);
        Self {
            binary: vec![],
            ns,
            opts,
        }
    }

    pub(crate) fn from_sock(ns: Arc<Namespace<A>>, sid: Sid) -> Self {
        Self {
            binary: vec![],
            ns,
            opts: BroadcastOptions::new(sid),
        }
    }

    /// Select every socket in the given rooms, except the sender.
    pub fn to(mut self, rooms: impl RoomParam) -> Self {
        self.opts.rooms.extend(rooms.into_room_iter());
        self.opts.flags.insert(BroadcastFlags::Broadcast);
        self
    }

    /// Select every socket in the given rooms, including the sender.
    pub fn within(mut self, rooms: impl RoomParam) -> Self {
        self.opts.rooms.extend(rooms.into_room_iter());
        self
    }

    /// Exclude every socket in the given rooms.
    pub fn except(mut self, rooms: impl RoomParam) -> Self {
        self.opts.except.extend(rooms.into_room_iter());
        self.opts.flags.insert(BroadcastFlags::Broadcast);
        self
    }

    /// Exclude the given sockets individually.
    pub fn except_sockets(mut self, sids: impl IntoIterator<Item = Sid>) -> Self {
        self.opts.except_sids.extend(sids);
        self
    }

    /// Keep the broadcast on this node, even with a cross-node adapter.
    pub fn local(mut self) -> Self {
        self.opts.flags.insert(BroadcastFlags::Local);
        self
    }

    /// Select every socket of the namespace, except the sender.
    pub fn broadcast(mut self) -> Self {
        self.opts.flags.insert(BroadcastFlags::Broadcast);
        self
    }

    /// Ask the transport to compress the message when it can.
    pub fn compress(mut self) -> Self {
        self.opts.flags.insert(BroadcastFlags::Compress);
        self
    }

    /// Attach binary payloads to the message.
    pub fn bin(mut self, binary: Vec<Vec<u8>>) -> Self {
        self.binary = binary;
        self
    }

    /// Override the ack timeout of `emit_with_ack`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.flags.insert(BroadcastFlags::Timeout(timeout));
        self
    }

    /// Emit the event to every selected socket.
    pub fn emit<T: Serialize>(
        self,
        event: impl Into<Cow<'static, str>>,
        data: T,
    ) -> Result<(), BroadcastError> {
        let packet = self.prepare_packet(event, data)?;
        self.ns.adapter.broadcast(packet, self.opts)
    }

    /// Emit the event to every selected socket and collect one ack per
    /// recipient.
    pub fn emit_with_ack<V: DeserializeOwned, T: Serialize>(
        self,
        event: impl Into<Cow<'static, str>>,
        data: T,
    ) -> Result<AckStream<V>, BroadcastError> {
        let packet = self.prepare_packet(event, data)?;
        Ok(self.ns.adapter.broadcast_with_ack(packet, self.opts))
    }

    /// Make every selected socket join the given rooms.
    pub fn join(self, rooms: impl RoomParam) {
        self.ns.adapter.add_sockets(self.opts, rooms)
    }

    /// Make every selected socket leave the given rooms.
    pub fn leave(self, rooms: impl RoomParam) {
        self.ns.adapter.del_sockets(self.opts, rooms)
    }

    /// The selected sockets.
    pub fn sockets(self) -> Vec<SocketRef<A>> {
        self.ns
            .adapter
            .fetch_sockets(self.opts)
            .into_iter()
            .map(SocketRef::from)
            .collect()
    }

    /// Disconnect every selected socket from the namespace.
    pub fn disconnect(self) -> Result<(), BroadcastError> {
        self.ns.adapter.disconnect_sockets(self.opts)
    }

    fn prepare_packet<T: Serialize>(
        &self,
        event: impl Into<Cow<'static, str>>,
        data: T,
    ) -> Result<Packet<'static>, BroadcastError> {
        let event = event.into();
        let ns = self.ns.path.clone();
        let data = serde_json::to_value(data)?;
        let packet = if self.binary.is_empty() {
            Packet::event(ns, event, data)
        } else {
            Packet::bin_event(ns, event, data, self.binary.clone())
        };
        Ok(packet)
    }
}
