//! A [`Socket`] is a client connected to a namespace.
//!
//! It registers the event handlers, owns the acknowledgement table and is
//! the entry point of the room and broadcast operations. It holds a
//! non-owning handle to the underlying engine connection: closing the socket
//! never prolongs the connection's lifetime.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::oneshot::{self, Receiver};

use crate::{
    ack::{AckInnerStream, AckResponse, AckResult, AckStream},
    adapter::{Adapter, LocalAdapter, Room, Session},
    client::SocketData,
    config::SocketIoConfig,
    errors::{Error, HandlerError, SendError, SocketError},
    handler::{
        BoxedDisconnectHandler, BoxedMessageHandler, DisconnectHandler, MakeErasedHandler,
        MessageHandler,
    },
    ns::Namespace,
    operators::{BroadcastOperators, ConfOperators, RoomParam},
    packet::{Packet, PacketData},
};
use beamio::{socket::DisconnectReason as EIoDisconnectReason, Sid};

/// Event names the protocol claims for itself. They cannot be emitted nor
/// registered as user handlers.
pub(crate) const RESERVED_EVENTS: [&str; 6] = [
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

pub(crate) fn is_reserved_event(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}

/// All the reasons a [`Socket`] can be disconnected from its namespace.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DisconnectReason {
    /// The transport was closed under the connection.
    TransportClose,
    /// An I/O fault on the transport.
    TransportError,
    /// The client did not answer the heartbeat in time.
    PingTimeout,
    /// The server closed the underlying connection.
    ForcedClose,
    /// A frame or packet could not be parsed.
    ParseError,
    /// The client sent an engine close packet.
    ClientTermination,
    /// The server is shutting down.
    ServerShuttingDown,
    /// The client sent a DISCONNECT packet for this namespace only.
    ClientNSDisconnect,
    /// The server disconnected the socket from this namespace only.
    ServerNSDisconnect,
}

impl DisconnectReason {
    /// Whether a session-aware adapter should keep the session restorable
    /// after this disconnect.
    pub(crate) fn is_recoverable(self) -> bool {
        matches!(
            self,
            DisconnectReason::TransportClose
                | DisconnectReason::TransportError
                | DisconnectReason::PingTimeout
        )
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use DisconnectReason::*;
        let str: &'static str = match self {
            TransportClose => "transport closed under the connection",
            TransportError => "transport error",
            PingTimeout => "client did not answer the heartbeat in time",
            ForcedClose => "server closed the connection",
            ParseError => "client sent an unparsable packet",
            ClientTermination => "client terminated the connection",
            ServerShuttingDown => "server is shutting down",
            ClientNSDisconnect => "client disconnected from the namespace",
            ServerNSDisconnect => "server disconnected the socket from the namespace",
        };
        f.write_str(str)
    }
}

impl From<EIoDisconnectReason> for DisconnectReason {
    fn from(reason: EIoDisconnectReason) -> Self {
        use DisconnectReason::*;
        match reason {
            EIoDisconnectReason::TransportClose => TransportClose,
            EIoDisconnectReason::TransportError => TransportError,
            EIoDisconnectReason::PingTimeout => PingTimeout,
            EIoDisconnectReason::ForcedClose => ForcedClose,
            EIoDisconnectReason::ParseError => ParseError,
            EIoDisconnectReason::ClientTermination => ClientTermination,
            EIoDisconnectReason::ServerShuttingDown => ServerShuttingDown,
        }
    }
}

/// A packet prepared for the wire: the primary frame and its binary
/// attachments. Broadcasts encode once and hand clones of this to each
/// recipient's connection.
#[derive(Debug, Clone)]
pub(crate) struct EncodedPacket {
    msg: String,
    bin: Vec<Vec<u8>>,
}

impl EncodedPacket {
    pub(crate) fn encode(mut packet: Packet<'_>) -> Result<Self, serde_json::Error> {
        let bin = match packet.inner {
            PacketData::BinaryEvent(_, ref mut bin, _) | PacketData::BinaryAck(ref mut bin, _) => {
                std::mem::take(&mut bin.bin)
            }
            _ => vec![],
        };
        let msg: String = packet.try_into()?;
        Ok(Self { msg, bin })
    }
}

type BoxedErrorHandler<A> = Arc<dyn Fn(Arc<Socket<A>>, HandlerError) + Send + Sync>;

/// A client connected to a namespace.
pub struct Socket<A: Adapter = LocalAdapter> {
    /// The socket id, shared with the underlying engine session.
    pub id: Sid,
    /// The private session id, present when the adapter persists sessions.
    pub(crate) pid: Option<Sid>,

    pub(crate) config: Arc<SocketIoConfig>,
    pub(crate) ns: Arc<Namespace<A>>,

    message_handlers: RwLock<HashMap<Cow<'static, str>, BoxedMessageHandler<A>>>,
    disconnect_handler: Mutex<Option<BoxedDisconnectHandler<A>>>,
    error_handler: Mutex<Option<BoxedErrorHandler<A>>>,

    ack_message: Mutex<HashMap<i64, oneshot::Sender<AckResult<Value>>>>,
    ack_counter: AtomicI64,

    esocket: Arc<beamio::Socket<SocketData>>,
}

impl<A: Adapter> Socket<A> {
    pub(crate) fn new(
        sid: Sid,
        pid: Option<Sid>,
        ns: Arc<Namespace<A>>,
        esocket: Arc<beamio::Socket<SocketData>>,
        config: Arc<SocketIoConfig>,
    ) -> Self {
        Self {
            id: sid,
            pid,
            config,
            ns,
            message_handlers: RwLock::new(HashMap::new()),
            disconnect_handler: Mutex::new(None),
            error_handler: Mutex::new(None),
            ack_message: Mutex::new(HashMap::new()),
            ack_counter: AtomicI64::new(0),
            esocket,
        }
    }

    /// Register a handler for the given event.
    ///
    /// Handler arguments are extractors; a handler is only called when every
    /// extractor succeeds, otherwise the failure is reported on the error
    /// channel (see [`Socket::on_error`]).
    ///
    /// # Panics
    /// When `event` is one of the reserved protocol events.
    pub fn on<H, T>(&self, event: impl Into<Cow<'static, str>>, handler: H)
    where
        H: MessageHandler<A, T>,
        T: Send + Sync + 'static,
    {
        let event = event.into();
        assert!(
            !is_reserved_event(&event),
            "event name \"{event}\" is reserved"
        );
        self.message_handlers
            .write()
            .unwrap()
            .insert(event, MakeErasedHandler::new_message_boxed(handler));
    }

    /// Register the disconnect handler. Only one; the last one registered
    /// wins.
    pub fn on_disconnect<H, T>(&self, handler: H)
    where
        H: DisconnectHandler<A, T> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let handler = MakeErasedHandler::new_disconnect_boxed(handler);
        self.disconnect_handler.lock().unwrap().replace(handler);
    }

    /// Register the error channel handler, receiving the non-fatal dispatch
    /// failures of this socket (argument mismatches, unknown acks).
    ///
    /// Without a handler they are logged as errors.
    pub fn on_error(&self, handler: impl Fn(Arc<Socket<A>>, HandlerError) + Send + Sync + 'static) {
        self.error_handler
            .lock()
            .unwrap()
            .replace(Arc::new(handler));
    }

    /// Emit an event to the client.
    ///
    /// Array-like data (tuples, vecs, arrays) is spread as multiple
    /// arguments; wrap an array in a tuple to send it as a single argument.
    pub fn emit<T: Serialize>(
        &self,
        event: impl Into<Cow<'static, str>>,
        data: T,
    ) -> Result<(), SendError> {
        let event = event.into();
        if is_reserved_event(&event) {
            return Err(SendError::ReservedEventName);
        }
        let data = serde_json::to_value(data)?;
        self.send(Packet::event(self.ns.path.clone(), event, data))
    }

    /// Emit an event and wait for the client's acknowledgement.
    ///
    /// The returned [`AckStream`] can be awaited directly; the ack timeout
    /// is the configured default unless overridden with
    /// [`timeout()`](Socket::timeout).
    pub fn emit_with_ack<V: DeserializeOwned>(
        &self,
        event: impl Into<Cow<'static, str>>,
        data: impl Serialize,
    ) -> Result<AckStream<V>, SendError> {
        let event = event.into();
        if is_reserved_event(&event) {
            return Err(SendError::ReservedEventName);
        }
        let data = serde_json::to_value(data)?;
        let packet = Packet::event(self.ns.path.clone(), event, data);
        let rx = self.send_with_ack(packet).map_err(SendError::Socket)?;
        Ok(AckInnerStream::send(rx, self.config.ack_timeout, self.id).into())
    }

    // Room operations

    /// Join the given rooms; they are created on first join.
    pub fn join(&self, rooms: impl RoomParam) {
        self.ns.adapter.add_all(self.id, rooms)
    }

    /// Leave the given rooms.
    pub fn leave(&self, rooms: impl RoomParam) {
        self.ns.adapter.del(self.id, rooms)
    }

    /// Leave every room.
    pub fn leave_all(&self) {
        self.ns.adapter.del_all(self.id)
    }

    /// The rooms this socket is in.
    pub fn rooms(&self) -> Vec<Room> {
        self.ns.adapter.socket_rooms(self.id)
    }

    // Operators

    /// Select every socket in the given rooms, except the current one.
    pub fn to(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).to(rooms)
    }

    /// Select every socket in the given rooms, including the current one.
    pub fn within(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).within(rooms)
    }

    /// Exclude every socket in the given rooms from the selection.
    pub fn except(&self, rooms: impl RoomParam) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).except(rooms)
    }

    /// Select every socket of the namespace, except the current one.
    pub fn broadcast(&self) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).broadcast()
    }

    /// Keep the broadcast on this node, even with a cross-node adapter.
    pub fn local(&self) -> BroadcastOperators<A> {
        BroadcastOperators::from_sock(self.ns.clone(), self.id).local()
    }

    /// Override the ack timeout of the next `emit_with_ack`.
    pub fn timeout(&self, timeout: Duration) -> ConfOperators<'_, A> {
        ConfOperators::new(self).timeout(timeout)
    }

    /// Attach binary payloads to the next emit.
    pub fn bin(&self, binary: Vec<Vec<u8>>) -> ConfOperators<'_, A> {
        ConfOperators::new(self).bin(binary)
    }

    /// Disconnect this socket from its namespace. The underlying connection
    /// and its other namespace sockets are unaffected.
    pub fn disconnect(self: Arc<Self>) -> Result<(), SocketError> {
        self.send(Packet::disconnect(&self.ns.path)).ok();
        self.close(DisconnectReason::ServerNSDisconnect);
        Ok(())
    }

    /// The namespace path of this socket.
    #[inline]
    pub fn ns(&self) -> &str {
        &self.ns.path
    }

    /// The transport currently carrying this socket's connection.
    pub fn transport_type(&self) -> beamio::TransportType {
        self.esocket.transport_type()
    }

    /// The http request that opened the underlying connection.
    pub fn req_parts(&self) -> &http::request::Parts {
        &self.esocket.req_parts
    }

    /// Whether the underlying connection is still open.
    pub fn connected(&self) -> bool {
        !self.esocket.is_closed()
    }

    pub(crate) fn send(&self, packet: Packet<'_>) -> Result<(), SendError> {
        let encoded = EncodedPacket::encode(packet)?;
        self.send_encoded(encoded).map_err(SendError::Socket)
    }

    pub(crate) fn send_encoded(&self, encoded: EncodedPacket) -> Result<(), SocketError> {
        let permit = self.esocket.reserve().map_err(SocketError::from)?;
        if encoded.bin.is_empty() {
            permit.emit(encoded.msg);
        } else {
            permit.emit_many(encoded.msg, encoded.bin);
        }
        Ok(())
    }

    /// Assign the next ack id to the packet and send it; the returned
    /// receiver resolves with the client's response.
    pub(crate) fn send_with_ack(
        &self,
        mut packet: Packet<'_>,
    ) -> Result<Receiver<AckResult<Value>>, SocketError> {
        let (tx, rx) = oneshot::channel();
        let ack = self.ack_counter.fetch_add(1, Ordering::SeqCst) + 1;
        packet.inner.set_ack_id(ack);

        match self.send(packet) {
            Ok(()) => {
                self.ack_message.lock().unwrap().insert(ack, tx);
            }
            Err(SendError::Socket(err)) => return Err(err),
            // Encoding failures resolve through the ack channel so a
            // broadcast still counts this recipient.
            Err(SendError::Serialize(err)) => {
                tx.send(Err(err.into())).ok();
            }
            Err(SendError::ReservedEventName) => unreachable!("checked before sending"),
        }
        Ok(rx)
    }

    /// Close the socket: run the disconnect handler, persist the session if
    /// the disconnect is recoverable and drop it from the namespace.
    pub(crate) fn close(self: Arc<Self>, reason: DisconnectReason) {
        if reason.is_recoverable() && self.ns.adapter.supports_recovery() {
            if let Some(pid) = self.pid {
                self.ns.adapter.persist_session(Session {
                    sid: self.id,
                    pid,
                    rooms: self.rooms(),
                    missed_packets: vec![],
                });
            }
        }

        if let Some(handler) = self.disconnect_handler.lock().unwrap().take() {
            handler.call(self.clone(), reason);
        }
        self.ns.remove_socket(self.id);
    }

    /// Dispatch a packet addressed to this socket.
    pub(crate) fn recv(self: Arc<Self>, packet: PacketData<'static>) -> Result<(), Error> {
        match packet {
            PacketData::Event(e, data, ack) => self.recv_event(&e, data, vec![], ack),
            PacketData::BinaryEvent(e, bin, ack) => {
                let (data, bins) = bin.split_args();
                self.recv_event(&e, data, bins, ack)
            }
            PacketData::EventAck(data, ack) => self.recv_ack(data, vec![], ack),
            PacketData::BinaryAck(bin, ack) => {
                let (data, bins) = bin.split_args();
                self.recv_ack(data, bins, ack)
            }
            PacketData::Disconnect => {
                self.close(DisconnectReason::ClientNSDisconnect);
                Ok(())
            }
            PacketData::Connect(_) | PacketData::ConnectError(_) => {
                unreachable!("handled by the client before dispatch")
            }
        }
    }

    fn recv_event(
        self: Arc<Self>,
        e: &str,
        data: Value,
        bins: Vec<Vec<u8>>,
        ack: Option<i64>,
    ) -> Result<(), Error> {
        let handler = self.message_handlers.read().unwrap().get(e).cloned();
        if let Some(handler) = handler {
            if let Err(message) = handler.call(self.clone(), data, bins, ack) {
                self.report_error(HandlerError::ArityMismatch {
                    event: e.to_string(),
                    message,
                });
            }
        }
        Ok(())
    }

    fn recv_ack(self: Arc<Self>, data: Value, bins: Vec<Vec<u8>>, ack: i64) -> Result<(), Error> {
        // Lookup and removal are one operation: an ack id resolves once.
        let tx = self.ack_message.lock().unwrap().remove(&ack);
        match tx {
            Some(tx) => {
                tx.send(Ok(AckResponse {
                    data,
                    binary: bins,
                }))
                .ok();
            }
            None => self.report_error(HandlerError::UnknownAck(ack)),
        }
        Ok(())
    }

    /// Surface a non-fatal dispatch failure on the error channel. An
    /// unhandled error is a bug somewhere, so it is logged loudly rather
    /// than swallowed.
    pub(crate) fn report_error(self: &Arc<Self>, err: HandlerError) {
        let handler = self.error_handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(self.clone(), err),
            None => tracing::error!(sid = ?self.id, "unhandled socket error: {err}"),
        }
    }
}

impl<A: Adapter> Debug for Socket<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("sid", &self.id)
            .field("pid", &self.pid)
            .field("ns", &self.ns())
            .field("ack_counter", &self.ack_counter)
            .finish()
    }
}

impl<A: Adapter> PartialEq for Socket<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[cfg(test)]
impl<A: Adapter> Socket<A> {
    pub(crate) fn new_dummy(sid: Sid, ns: Arc<Namespace<A>>) -> Socket<A> {
        let close_fn = Box::new(move |_, _| ());
        Socket::new(
            sid,
            None,
            ns,
            beamio::Socket::new_dummy(sid, close_fn),
            Arc::new(SocketIoConfig::default()),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::AckError;

    #[tokio::test]
    async fn ack_ids_are_strictly_monotonic() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let socket = ns.get_socket(sid).unwrap();

        let mut ids = vec![];
        for _ in 0..10 {
            let packet = Packet::event("/", "test", Value::Null);
            socket.send_with_ack(packet).unwrap();
            ids.push(socket.ack_counter.load(Ordering::SeqCst));
        }
        for window in ids.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[tokio::test]
    async fn reserved_events_cannot_be_emitted() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let socket = ns.get_socket(sid).unwrap();

        for event in RESERVED_EVENTS {
            assert!(matches!(
                socket.emit(event, "data"),
                Err(SendError::ReservedEventName)
            ));
        }
        socket.emit("fine", "data").unwrap();
    }

    #[tokio::test]
    #[should_panic(expected = "reserved")]
    async fn reserved_events_cannot_be_registered() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let socket = ns.get_socket(sid).unwrap();
        socket.on("disconnecting", || ());
    }

    #[tokio::test]
    async fn unknown_ack_goes_to_error_channel() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);
        let socket = ns.get_socket(sid).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        socket.on_error(move |_, err| {
            tx.try_send(err.to_string()).unwrap();
        });

        socket
            .clone()
            .recv(PacketData::EventAck(Value::Null, 42))
            .unwrap();
        let err = rx.recv().await.unwrap();
        assert!(err.contains("unknown id: 42"), "got: {err}");
    }

    #[tokio::test]
    async fn ack_times_out() {
        let sid = Sid::new();
        let ns = Namespace::<LocalAdapter>::new_dummy([sid]);

        let mut config = SocketIoConfig::default();
        config.ack_timeout = Duration::from_millis(10);
        let socket = Arc::new(Socket::new(
            sid,
            None,
            ns.clone(),
            beamio::Socket::new_dummy(sid, Box::new(move |_, _| ())),
            Arc::new(config),
        ));

        let ack = socket.emit_with_ack::<Value>("test", Value::Null).unwrap();
        assert!(matches!(ack.await, Err(AckError::Timeout)));
    }
}
