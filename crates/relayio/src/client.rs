//! The [`Client`] bridges the engine and the namespaces: it implements the
//! engine handler, routes CONNECT packets, reassembles binary packets and
//! fans engine disconnects out to the namespace sockets.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::{
    adapter::Adapter,
    config::SocketIoConfig,
    errors::Error,
    handler::{BoxedConnectHandler, ConnectHandler, MakeErasedHandler},
    ns::Namespace,
    packet::{Packet, PacketData},
    socket::DisconnectReason,
};
use beamio::{
    handler::EngineHandler, socket::DisconnectReason as EIoDisconnectReason,
    Sid, Socket as EIoSocket,
};

pub struct Client<A: Adapter> {
    pub(crate) config: Arc<SocketIoConfig>,
    ns: RwLock<HashMap<Cow<'static, str>, Arc<Namespace<A>>>>,
    /// Handler used to lazily create namespaces on first CONNECT, when the
    /// server accepts any namespace.
    fallback_handler: Mutex<Option<Box<dyn Fn() -> BoxedConnectHandler<A> + Send + Sync>>>,
}

impl<A: Adapter> Client<A> {
    pub fn new(config: Arc<SocketIoConfig>) -> Self {
        Self {
            config,
            ns: RwLock::new(HashMap::new()),
            fallback_handler: Mutex::new(None),
        }
    }

    /// Register a namespace handler.
    pub fn add_ns<C, T>(&self, path: Cow<'static, str>, handler: C)
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        tracing::debug!("adding namespace {}", path);
        let handler = MakeErasedHandler::new_connect_boxed(handler);
        let ns = Namespace::new(path.clone(), handler, self.config.clone());
        self.ns.write().unwrap().insert(path, ns);
    }

    /// Accept CONNECT packets for any namespace, creating it on demand with
    /// a clone of the given handler.
    pub fn accept_any_namespace<C, T>(&self, handler: C)
    where
        C: ConnectHandler<A, T> + Clone,
        T: Send + Sync + 'static,
    {
        let make = move || MakeErasedHandler::new_connect_boxed(handler.clone());
        self.fallback_handler
            .lock()
            .unwrap()
            .replace(Box::new(make));
    }

    /// Remove a namespace handler, closing every socket connected to it.
    pub fn delete_ns(&self, path: &str) {
        tracing::debug!("deleting namespace {}", path);
        if let Some(ns) = self.ns.write().unwrap().remove(path) {
            ns.close(DisconnectReason::ServerNSDisconnect);
        }
    }

    pub fn get_ns(&self, path: &str) -> Option<Arc<Namespace<A>>> {
        self.ns.read().unwrap().get(path).cloned()
    }

    /// Close every namespace.
    pub(crate) fn close(&self) {
        tracing::debug!("closing all namespaces");
        let ns: Vec<_> = self.ns.read().unwrap().values().cloned().collect();
        for ns in ns {
            ns.close(DisconnectReason::ServerShuttingDown);
        }
    }

    /// Route a CONNECT packet: find or lazily create the namespace, or
    /// answer `CONNECT_ERROR`.
    fn sock_connect(
        &self,
        auth: Option<String>,
        ns_path: &str,
        esocket: &Arc<EIoSocket<SocketData>>,
    ) {
        let ns = self.get_ns(ns_path).or_else(|| {
            let make = self.fallback_handler.lock().unwrap();
            make.as_ref().map(|make| {
                let path: Cow<'static, str> = Cow::Owned(ns_path.to_string());
                let ns = Namespace::new(path.clone(), make(), self.config.clone());
                self.ns.write().unwrap().insert(path, ns.clone());
                ns
            })
        });

        if let Some(ns) = ns {
            let esocket = esocket.clone();
            tokio::spawn(async move {
                if ns
                    .connect(esocket.id, esocket.clone(), auth)
                    .await
                    .is_ok()
                {
                    // the connection joined a namespace in time
                    if let Some(tx) = esocket.data.connect_recv_tx.lock().unwrap().take() {
                        tx.send(()).ok();
                    }
                }
            });
        } else {
            let packet = Packet::invalid_namespace(ns_path);
            if let Ok(packet) = String::try_from(packet) {
                if let Err(_e) = esocket.emit(packet) {
                    tracing::error!("error sending invalid namespace packet: {:?}", _e);
                }
            }
        }
    }

    /// Forward a packet to the socket of its namespace.
    fn sock_propagate_packet(&self, packet: Packet<'static>, sid: Sid) -> Result<(), Error> {
        if let Some(ns) = self.get_ns(&packet.ns) {
            ns.recv(sid, packet.inner)
        } else {
            tracing::debug!("invalid namespace requested: {}", packet.ns);
            Ok(())
        }
    }

    /// Close connections that stay outside every namespace longer than the
    /// connect timeout.
    fn spawn_connect_timeout_task(&self, socket: Arc<EIoSocket<SocketData>>) {
        let (tx, rx) = oneshot::channel();
        socket.data.connect_recv_tx.lock().unwrap().replace(tx);

        tokio::spawn(
            tokio::time::timeout(self.config.connect_timeout, rx).map(move |res| {
                if res.is_err() {
                    tracing::debug!(sid = ?socket.id, "connect timeout");
                    socket.close(EIoDisconnectReason::ForcedClose);
                }
            }),
        );
    }
}

/// Engine-level state attached to each connection.
#[derive(Debug, Default)]
pub struct SocketData {
    /// A binary packet being reassembled: the primary frame arrived, some
    /// attachments have not.
    pub(crate) partial_bin_packet: Mutex<Option<Packet<'static>>>,
    /// Fired when the connection joins its first namespace, disarming the
    /// connect timeout.
    pub(crate) connect_recv_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl<A: Adapter> EngineHandler for Client<A> {
    type Data = SocketData;

    fn on_connect(self: &Arc<Self>, socket: Arc<EIoSocket<SocketData>>) {
        tracing::debug!(sid = ?socket.id, "engine socket connected");
        // The socket.io layer stays dormant until a CONNECT packet shows up.
        self.spawn_connect_timeout_task(socket);
    }

    fn on_disconnect(&self, socket: Arc<EIoSocket<SocketData>>, reason: EIoDisconnectReason) {
        tracing::debug!(sid = ?socket.id, "engine socket disconnected: {reason:?}");
        let socks: Vec<_> = self
            .ns
            .read()
            .unwrap()
            .values()
            .filter_map(|ns| ns.get_socket(socket.id).ok())
            .collect();

        for sock in socks {
            sock.close(reason.into());
        }
    }

    fn on_message(&self, msg: String, socket: Arc<EIoSocket<SocketData>>) {
        // A text frame while binary attachments are pending is a protocol
        // violation.
        if socket.data.partial_bin_packet.lock().unwrap().is_some() {
            tracing::debug!(sid = ?socket.id, "text frame while expecting binary attachments");
            socket.close(EIoDisconnectReason::ParseError);
            return;
        }

        let packet = match Packet::try_from(msg) {
            Ok(packet) => packet,
            Err(_e) => {
                tracing::debug!(sid = ?socket.id, "packet parse error: {}", _e);
                socket.close(EIoDisconnectReason::ParseError);
                return;
            }
        };

        let res: Result<(), Error> = match packet.inner {
            PacketData::Connect(auth) => {
                self.sock_connect(auth, &packet.ns, &socket);
                Ok(())
            }
            PacketData::BinaryEvent(_, _, _) | PacketData::BinaryAck(_, _) => {
                // hold the packet until all attachments arrived
                socket
                    .data
                    .partial_bin_packet
                    .lock()
                    .unwrap()
                    .replace(packet);
                Ok(())
            }
            _ => self.sock_propagate_packet(packet, socket.id),
        };
        if let Err(ref err) = res {
            tracing::debug!(sid = ?socket.id, "error processing packet: {}", err);
            if let Some(reason) = err.into() {
                socket.close(reason);
            }
        }
    }

    fn on_binary(&self, data: Vec<u8>, socket: Arc<EIoSocket<SocketData>>) {
        match apply_payload_on_packet(data, &socket) {
            Ok(true) => {
                if let Some(packet) = socket.data.partial_bin_packet.lock().unwrap().take() {
                    if let Err(ref err) = self.sock_propagate_packet(packet, socket.id) {
                        tracing::debug!(sid = ?socket.id, "error propagating packet: {}", err);
                        if let Some(reason) = err.into() {
                            socket.close(reason);
                        }
                    }
                }
            }
            Ok(false) => (),
            Err(_) => {
                tracing::debug!(sid = ?socket.id, "binary frame without a pending binary packet");
                socket.close(EIoDisconnectReason::ParseError);
            }
        }
    }
}

impl<A: Adapter> std::fmt::Debug for Client<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("ns", &self.ns.read().unwrap().len())
            .finish()
    }
}

/// Add one binary attachment to the pending packet.
///
/// `Ok(true)` when the packet is complete, `Err` when no binary packet was
/// pending.
fn apply_payload_on_packet(
    data: Vec<u8>,
    socket: &EIoSocket<SocketData>,
) -> Result<bool, Error> {
    match *socket.data.partial_bin_packet.lock().unwrap() {
        Some(ref mut packet) => match packet.inner {
            PacketData::BinaryEvent(_, ref mut bin, _) | PacketData::BinaryAck(ref mut bin, _) => {
                bin.add_payload(data);
                Ok(bin.is_complete())
            }
            _ => unreachable!("partial_bin_packet is only set for binary packets"),
        },
        None => Err(Error::UnexpectedBinaryFrame),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adapter::LocalAdapter;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const CONNECT_TIMEOUT: Duration = Duration::from_millis(10);

    fn create_client() -> Arc<Client<LocalAdapter>> {
        let mut config = SocketIoConfig::default();
        config.connect_timeout = CONNECT_TIMEOUT;
        let client = Client::<LocalAdapter>::new(Arc::new(config));
        client.add_ns("/".into(), || {});
        Arc::new(client)
    }

    #[tokio::test]
    async fn connect_timeout_closes_silent_connections() {
        let client = create_client();
        let (tx, mut rx) = mpsc::channel(1);
        let close_fn = Box::new(move |_, _| tx.try_send(()).unwrap());
        let sock = EIoSocket::new_dummy(Sid::new(), close_fn);
        client.on_connect(sock.clone());
        tokio::time::timeout(CONNECT_TIMEOUT * 10, rx.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn connect_disarms_the_timeout() {
        let client = create_client();
        let (tx, mut rx) = mpsc::channel(1);
        let close_fn = Box::new(move |_, _| tx.try_send(()).unwrap());
        let sock = EIoSocket::new_dummy(Sid::new(), close_fn);
        client.on_connect(sock.clone());
        client.on_message("0".into(), sock.clone());
        tokio::time::timeout(CONNECT_TIMEOUT * 10, rx.recv())
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn unknown_namespace_is_refused() {
        let client = create_client();
        let (tx, mut rx) = mpsc::channel(1);
        let close_fn = Box::new(move |_, _| tx.try_send(()).unwrap());
        let (sock, mut packets) =
            EIoSocket::<SocketData>::new_dummy_piped(Sid::new(), close_fn, 16);
        client.on_message("0/nope,".into(), sock.clone());

        let packet = packets.recv().await.unwrap();
        match packet {
            beamio::Packet::Message(msg) => {
                assert_eq!(msg, "4/nope,{\"message\":\"Invalid namespace\"}")
            }
            p => panic!("unexpected packet {p:?}"),
        }
        // the connection itself survives
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn accept_any_namespace_creates_lazily() {
        let client = create_client();
        client.accept_any_namespace(|| {});
        let close_fn = Box::new(move |_, _| ());
        let sock = EIoSocket::<SocketData>::new_dummy(Sid::new(), close_fn);
        client.on_message("0/dynamic,".into(), sock.clone());
        // connection runs async
        tokio::time::sleep(Duration::from_millis(50)).await;
        let ns = client.get_ns("/dynamic").unwrap();
        assert!(ns.has(sock.id));
    }
}
