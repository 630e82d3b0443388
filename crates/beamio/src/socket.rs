//! A [`Socket`] is one engine connection, whatever transport currently
//! carries it.
//!
//! It owns the outbound packet queue, the heartbeat job and the per
//! connection handler data. The active transport is tracked in an atomic so
//! the upgrade swaps it without locking the send path.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use http::request::Parts;
use smallvec::{smallvec, SmallVec};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError, Receiver},
        Mutex,
    },
    task::JoinHandle,
};

use crate::{
    config::EngineConfig, errors::Error, packet::Packet, peekable::PeekableReceiver,
    service::TransportType, sid::Sid,
};

/// Why a connection reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport was closed under the connection, e.g. the websocket
    /// stream ended without a close packet.
    TransportClose,
    /// An I/O fault on the transport. Also covers a second concurrent
    /// polling GET, which the protocol forbids.
    TransportError,
    /// The client did not answer a ping within `ping_timeout`.
    PingTimeout,
    /// The server closed the socket through [`Socket::close`].
    ForcedClose,
    /// A frame or packet could not be parsed.
    ParseError,
    /// The client sent a close packet.
    ClientTermination,
    /// The whole server is shutting down.
    ServerShuttingDown,
}

/// A batch of packets sent as one unit through the internal channel.
///
/// Batching is what keeps a text frame and its adjacent binary attachments
/// atomic with respect to other writers.
pub(crate) type PacketBuf = SmallVec<[Packet; 2]>;

/// A permit holding one slot of the internal channel.
pub struct Permit<'a> {
    inner: mpsc::Permit<'a, PacketBuf>,
}

impl Permit<'_> {
    /// Consume the permit and emit a message to the client.
    #[inline]
    pub fn emit(self, msg: String) {
        self.inner.send(smallvec![Packet::Message(msg)]);
    }

    /// Consume the permit and emit a binary payload to the client.
    #[inline]
    pub fn emit_binary(self, data: Vec<u8>) {
        self.inner.send(smallvec![Packet::Binary(data)]);
    }

    /// Consume the permit and emit a message followed by binary payloads,
    /// atomically with respect to any other sender.
    pub fn emit_many(self, msg: String, data: Vec<Vec<u8>>) {
        let mut packets = SmallVec::with_capacity(data.len() + 1);
        packets.push(Packet::Message(msg));
        for d in data {
            packets.push(Packet::Binary(d));
        }
        self.inner.send(packets);
    }
}

/// One engine connection.
pub struct Socket<D>
where
    D: Default + Send + Sync + 'static,
{
    /// The session id.
    pub id: Sid,

    /// The active transport, as a [`TransportType`] bitfield value so the
    /// upgrade can swap it atomically.
    transport: AtomicU8,

    /// Set while a websocket probe is in flight; pauses the heartbeat so the
    /// probed transport does not race the ping window.
    upgrading: AtomicBool,

    /// Outbound queue. Locked by whoever currently drains it: the polling
    /// encoder for one request at a time, or the websocket writer task for
    /// the whole connection lifetime.
    pub(crate) internal_rx: Mutex<PeekableReceiver<PacketBuf>>,
    internal_tx: mpsc::Sender<PacketBuf>,

    /// Heartbeat: pongs received from the transport are forwarded through
    /// this channel to the heartbeat job.
    heartbeat_rx: Mutex<Receiver<()>>,
    pub(crate) heartbeat_tx: mpsc::Sender<()>,
    heartbeat_handle: Mutex<Option<JoinHandle<()>>>,

    /// Called once when the socket must be torn down.
    close_fn: Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>,

    /// Handler data bound to this connection.
    pub data: D,

    /// The parts of the http request that opened the connection.
    pub req_parts: Parts,
}

impl<D> Socket<D>
where
    D: Default + Send + Sync + 'static,
{
    pub(crate) fn new(
        transport: TransportType,
        config: &EngineConfig,
        req_parts: Parts,
        close_fn: Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(config.max_buffer_size);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(1);

        Self {
            id: Sid::new(),
            transport: AtomicU8::new(transport as u8),
            upgrading: AtomicBool::new(false),

            internal_rx: Mutex::new(PeekableReceiver::new(internal_rx)),
            internal_tx,

            heartbeat_rx: Mutex::new(heartbeat_rx),
            heartbeat_tx,
            heartbeat_handle: Mutex::new(None),
            close_fn,

            data: D::default(),
            req_parts,
        }
    }

    /// Send a single packet to the connection.
    pub(crate) fn send(&self, packet: Packet) -> Result<(), Error> {
        self.internal_tx
            .try_send(smallvec![packet])
            .map_err(|_| Error::SendChannel)
    }

    /// Reserve a slot in the internal channel.
    ///
    /// Fails when the buffer is full or the connection is closed.
    pub fn reserve(&self) -> Result<Permit<'_>, TrySendError<()>> {
        let inner = self.internal_tx.try_reserve()?;
        Ok(Permit { inner })
    }

    /// Emit a message to the client.
    ///
    /// On polling the message is buffered until the next GET; on websocket it
    /// is written as a text frame.
    pub fn emit(&self, msg: String) -> Result<(), TrySendError<String>> {
        self.internal_tx
            .try_send(smallvec![Packet::Message(msg)])
            .map_err(|e| match e {
                TrySendError::Full(mut p) => TrySendError::Full(p.pop().unwrap().into_message()),
                TrySendError::Closed(mut p) => {
                    TrySendError::Closed(p.pop().unwrap().into_message())
                }
            })
    }

    /// Emit a binary payload to the client.
    pub fn emit_binary(&self, data: Vec<u8>) -> Result<(), TrySendError<Vec<u8>>> {
        self.internal_tx
            .try_send(smallvec![Packet::Binary(data)])
            .map_err(|e| match e {
                TrySendError::Full(mut p) => TrySendError::Full(p.pop().unwrap().into_binary()),
                TrySendError::Closed(mut p) => TrySendError::Closed(p.pop().unwrap().into_binary()),
            })
    }

    /// Close the socket and the underlying connection.
    ///
    /// Idempotent and non-blocking: the first call tears the session down,
    /// later calls find the session already gone.
    pub fn close(&self, reason: DisconnectReason) {
        (self.close_fn)(self.id, reason);
        self.send(Packet::Close).ok();
    }

    /// Whether no more packets can be sent to the client.
    pub fn is_closed(&self) -> bool {
        self.internal_tx.is_closed()
    }

    /// Resolves when the connection is fully closed.
    pub async fn closed(&self) {
        self.internal_tx.closed().await
    }

    pub(crate) fn abort_heartbeat(&self) {
        if let Ok(Some(handle)) = self.heartbeat_handle.try_lock().map(|mut h| h.take()) {
            handle.abort();
        }
    }

    pub(crate) fn spawn_heartbeat(self: &Arc<Self>, interval: Duration, timeout: Duration) {
        let socket = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(_e) = socket.heartbeat_job(interval, timeout).await {
                tracing::debug!(sid = ?socket.id, "heartbeat error: {:?}", _e);
                socket.close(DisconnectReason::PingTimeout);
            }
        });
        self.heartbeat_handle
            .try_lock()
            .expect("heartbeat handle mutex locked twice")
            .replace(handle);
    }

    /// Send a ping every `interval` and require a pong within `timeout`.
    async fn heartbeat_job(&self, interval: Duration, timeout: Duration) -> Result<(), Error> {
        let mut heartbeat_rx = self
            .heartbeat_rx
            .try_lock()
            .expect("heartbeat rx locked twice");

        let mut tick = tokio::time::interval(interval);
        tick.tick().await; // the first tick resolves immediately
                           // Some clients race a pong in before the first ping, consume it.
        heartbeat_rx.try_recv().ok();
        loop {
            tick.tick().await;

            // The ping window is suspended during a transport probe.
            if self.is_upgrading() {
                continue;
            }

            self.internal_tx
                .try_send(smallvec![Packet::Ping])
                .map_err(|_| Error::HeartbeatTimeout)?;

            tokio::time::timeout(timeout, heartbeat_rx.recv())
                .await
                .map_err(|_| Error::HeartbeatTimeout)?
                .ok_or(Error::HeartbeatTimeout)?;
        }
    }

    pub(crate) fn is_ws(&self) -> bool {
        self.transport.load(Ordering::Relaxed) == TransportType::Websocket as u8
    }
    pub(crate) fn is_http(&self) -> bool {
        self.transport.load(Ordering::Relaxed) == TransportType::Polling as u8
    }

    pub(crate) fn is_upgrading(&self) -> bool {
        self.upgrading.load(Ordering::Relaxed)
    }
    pub(crate) fn start_upgrade(&self) {
        self.upgrading.store(true, Ordering::Relaxed);
    }
    pub(crate) fn cancel_upgrade(&self) {
        self.upgrading.store(false, Ordering::Relaxed);
    }

    /// Commit the upgrade: the websocket becomes the authoritative transport.
    pub(crate) fn upgrade_to_websocket(&self) {
        self.upgrading.store(false, Ordering::Relaxed);
        self.transport
            .store(TransportType::Websocket as u8, Ordering::Relaxed);
    }

    /// The current transport of this connection.
    pub fn transport_type(&self) -> TransportType {
        TransportType::from(self.transport.load(Ordering::Relaxed))
    }
}

impl<D: Default + Send + Sync + 'static> std::fmt::Debug for Socket<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("sid", &self.id)
            .field("transport", &self.transport_type())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[doc(hidden)]
#[cfg(feature = "__test_harness")]
impl<D> Socket<D>
where
    D: Default + Send + Sync + 'static,
{
    /// Create a detached socket that discards everything sent to it.
    pub fn new_dummy(
        sid: Sid,
        close_fn: Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>,
    ) -> Arc<Socket<D>> {
        let (socket, mut rx) = Socket::new_dummy_piped(sid, close_fn, 1024);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        socket
    }

    /// Create a detached socket along with a receiver yielding every packet
    /// sent to the client.
    pub fn new_dummy_piped(
        sid: Sid,
        close_fn: Box<dyn Fn(Sid, DisconnectReason) + Send + Sync>,
        buffer_size: usize,
    ) -> (Arc<Socket<D>>, tokio::sync::mpsc::Receiver<Packet>) {
        let (internal_tx, internal_rx) = mpsc::channel(buffer_size);
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(1);

        let socket = Arc::new(Self {
            id: sid,
            transport: AtomicU8::new(TransportType::Websocket as u8),
            upgrading: AtomicBool::new(false),

            internal_rx: Mutex::new(PeekableReceiver::new(internal_rx)),
            internal_tx,

            heartbeat_rx: Mutex::new(heartbeat_rx),
            heartbeat_tx,
            heartbeat_handle: Mutex::new(None),
            close_fn,

            data: D::default(),
            req_parts: http::Request::<()>::default().into_parts().0,
        });

        let (tx, rx) = mpsc::channel(buffer_size);
        let sock = socket.clone();
        tokio::spawn(async move {
            let mut internal_rx = sock.internal_rx.try_lock().unwrap();
            while let Some(packets) = internal_rx.recv().await {
                for packet in packets {
                    if tx.send(packet).await.is_err() {
                        return;
                    }
                }
            }
        });

        (socket, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_socket() -> Socket<()> {
        let config = EngineConfig::default();
        let parts = http::Request::<()>::default().into_parts().0;
        Socket::new(
            TransportType::Polling,
            &config,
            parts,
            Box::new(|_, _| ()),
        )
    }

    #[tokio::test]
    async fn emit_buffers_packets() {
        let socket = make_socket();
        socket.emit("hello".to_string()).unwrap();
        socket.emit_binary(vec![1, 2, 3]).unwrap();

        let mut rx = socket.internal_rx.try_lock().unwrap();
        assert_eq!(
            rx.try_recv().unwrap().to_vec(),
            vec![Packet::Message("hello".to_string())]
        );
        assert_eq!(
            rx.try_recv().unwrap().to_vec(),
            vec![Packet::Binary(vec![1, 2, 3])]
        );
    }

    #[tokio::test]
    async fn permit_batch_is_atomic() {
        let socket = make_socket();
        let permit = socket.reserve().unwrap();
        permit.emit_many("event".to_string(), vec![vec![1], vec![2]]);

        let mut rx = socket.internal_rx.try_lock().unwrap();
        assert_eq!(
            rx.try_recv().unwrap().to_vec(),
            vec![
                Packet::Message("event".to_string()),
                Packet::Binary(vec![1]),
                Packet::Binary(vec![2]),
            ]
        );
    }

    #[tokio::test]
    async fn transport_swap() {
        let socket = make_socket();
        assert!(socket.is_http());
        socket.start_upgrade();
        assert!(socket.is_upgrading());
        socket.upgrade_to_websocket();
        assert!(socket.is_ws());
        assert!(!socket.is_upgrading());
        assert_eq!(socket.transport_type(), TransportType::Websocket);
    }
}
