use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{Arc, Once, RwLock},
    time::Duration,
};

use serde_json::Value;

use crate::{
    adapter::{Adapter, Room, Session},
    client::SocketData,
    config::SocketIoConfig,
    errors::Error,
    handler::BoxedConnectHandler,
    packet::{Packet, PacketData},
    socket::{DisconnectReason, Socket},
};
use beamio::Sid;

/// A namespace is a logical endpoint multiplexed over the connections. It
/// owns the sockets connected to it and their room membership, through its
/// adapter.
pub struct Namespace<A: Adapter> {
    pub path: Cow<'static, str>,
    pub(crate) adapter: A,
    handler: BoxedConnectHandler<A>,
    adapter_init: Once,
    config: Arc<SocketIoConfig>,
    sockets: RwLock<HashMap<Sid, Arc<Socket<A>>>>,
}

impl<A: Adapter> Namespace<A> {
    pub(crate) fn new(
        path: Cow<'static, str>,
        handler: BoxedConnectHandler<A>,
        config: Arc<SocketIoConfig>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|ns| Self {
            path,
            handler,
            adapter_init: Once::new(),
            config,
            sockets: HashMap::new().into(),
            adapter: A::new(ns.clone()),
        })
    }

    pub fn ack_timeout(&self) -> Duration {
        self.config.ack_timeout
    }

    /// Connect a socket to this namespace: restore its session if it asks
    /// for one, run the middleware chain, register it and send the connect
    /// reply.
    pub(crate) async fn connect(
        self: Arc<Self>,
        sid: Sid,
        esocket: Arc<beamio::Socket<SocketData>>,
        auth: Option<String>,
    ) -> Result<(), Error> {
        // The adapter's background machinery needs a runtime, which is
        // guaranteed here but not at namespace registration time.
        self.adapter_init.call_once(|| self.adapter.init());

        // Session restoration is driven by the client handing back its
        // private id and last seen offset in the auth payload.
        let mut session: Option<Session> = None;
        let mut pid = None;
        if self.adapter.supports_recovery() {
            if let Some(recovery) = auth.as_deref().and_then(parse_recovery_auth) {
                session = self.adapter.restore_session(recovery.0, &recovery.1);
            }
            pid = Some(session.as_ref().map(|s| s.pid).unwrap_or_else(Sid::new));
        }

        let socket: Arc<Socket<A>> = Socket::new(
            sid,
            pid,
            self.clone(),
            esocket.clone(),
            self.config.clone(),
        )
        .into();

        // Any middleware failure is answered with CONNECT_ERROR on this
        // namespace; the connection itself survives.
        if let Err(e) = self.handler.call_middleware(socket.clone(), &auth).await {
            tracing::debug!(?sid, ns = %self.path, "connection refused: {e}");
            let packet = Packet::connect_error(&self.path, e.to_string());
            if let Ok(packet) = String::try_from(packet) {
                esocket.emit(packet).ok();
            }
            return Ok(());
        }

        self.sockets.write().unwrap().insert(sid, socket.clone());

        // Point-to-point addressing goes through the broadcast machinery:
        // every socket is a member of the room named after its own id.
        self.adapter.add_all(sid, Room::Owned(sid.to_string()));
        if let Some(session) = &session {
            self.adapter.add_all(sid, session.rooms.clone());
        }

        if let Err(_e) = socket.send(Packet::connect(&self.path, sid, socket.pid)) {
            tracing::debug!(?sid, "error sending connect reply: {_e:?}, closing conn");
            esocket.close(beamio::DisconnectReason::ParseError);
            return Ok(());
        }

        // Replay what the restored session missed, in emission order.
        if let Some(session) = session {
            for packet in session.missed_packets {
                socket.send(packet).ok();
            }
        }

        self.handler.call(socket, auth);
        Ok(())
    }

    /// Drop a socket from the namespace and wipe its room membership.
    pub(crate) fn remove_socket(&self, sid: Sid) {
        self.sockets.write().unwrap().remove(&sid);
        self.adapter.del_all(sid);
    }

    pub(crate) fn has(&self, sid: Sid) -> bool {
        self.sockets.read().unwrap().contains_key(&sid)
    }

    /// Dispatch a packet to the addressed socket.
    pub(crate) fn recv(&self, sid: Sid, packet: PacketData<'static>) -> Result<(), Error> {
        match packet {
            PacketData::Connect(_) => unreachable!("connect packets are handled by the client"),
            PacketData::ConnectError(_) => Err(Error::InvalidPacketType),
            packet => self.get_socket(sid)?.recv(packet),
        }
    }

    pub fn get_socket(&self, sid: Sid) -> Result<Arc<Socket<A>>, Error> {
        self.sockets
            .read()
            .unwrap()
            .get(&sid)
            .cloned()
            .ok_or(Error::SocketGone(sid))
    }

    pub fn get_sockets(&self) -> Vec<Arc<Socket<A>>> {
        self.sockets.read().unwrap().values().cloned().collect()
    }

    /// Close the namespace: stop the adapter and disconnect every socket.
    pub(crate) fn close(&self, reason: DisconnectReason) {
        tracing::debug!(ns = %self.path, "closing namespace");
        self.adapter.close();
        let sockets = self.get_sockets();
        for socket in sockets {
            socket.close(reason);
        }
        self.sockets.write().unwrap().shrink_to_fit();
    }
}

/// Extract `{pid, offset}` from a connect auth payload.
fn parse_recovery_auth(auth: &str) -> Option<(Sid, String)> {
    let value: Value = serde_json::from_str(auth).ok()?;
    let pid = value.get("pid")?.as_str()?.parse().ok()?;
    let offset = value.get("offset")?.as_str()?.to_string();
    Some((pid, offset))
}

impl<A: Adapter> std::fmt::Debug for Namespace<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("path", &self.path)
            .field("sockets", &self.sockets.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
impl<A: Adapter> Namespace<A> {
    pub(crate) fn new_dummy<const S: usize>(sockets: [Sid; S]) -> Arc<Self> {
        use crate::handler::MakeErasedHandler;
        let handler = MakeErasedHandler::new_connect_boxed(|| {});
        let ns = Namespace::new(
            Cow::Borrowed("/"),
            handler,
            Arc::new(SocketIoConfig::default()),
        );
        for sid in sockets {
            ns.sockets
                .write()
                .unwrap()
                .insert(sid, Socket::new_dummy(sid, ns.clone()).into());
        }
        ns
    }
}
