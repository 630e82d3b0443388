//! The engine owns every live session and the shutdown gate.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use http::request::Parts;

use crate::{
    config::EngineConfig,
    handler::EngineHandler,
    service::TransportType,
    sid::Sid,
    socket::{DisconnectReason, Socket},
};

/// The engine stores every open session and dispatches lifecycle events to
/// the handler. It is shared behind an [`Arc`] by every in-flight request.
pub struct Engine<H: EngineHandler> {
    sockets: RwLock<HashMap<Sid, Arc<Socket<H::Data>>>>,
    /// Set once on shutdown; any request arriving afterwards gets a 418.
    closed: AtomicBool,
    pub(crate) handler: Arc<H>,
    pub config: EngineConfig,
}

impl<H: EngineHandler> Engine<H> {
    pub fn new(handler: Arc<H>, config: EngineConfig) -> Self {
        Self {
            sockets: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            handler,
            config,
        }
    }

    /// Create a new session on the given transport and register it.
    ///
    /// The heartbeat is *not* started here: polling starts it right away
    /// while websocket starts it after its init handshake.
    pub(crate) fn create_session(
        self: &Arc<Self>,
        transport: TransportType,
        req_parts: Parts,
    ) -> Arc<Socket<H::Data>> {
        let engine = self.clone();
        let close_fn =
            Box::new(move |sid: Sid, reason: DisconnectReason| engine.close_session(sid, reason));
        let socket = Arc::new(Socket::new(transport, &self.config, req_parts, close_fn));
        self.sockets
            .write()
            .unwrap()
            .insert(socket.id, socket.clone());
        self.handler.on_connect(socket.clone());
        socket
    }

    /// Remove a session and notify the handler.
    ///
    /// This is the only removal path, so calling it twice is harmless: the
    /// second call finds nothing to remove.
    pub(crate) fn close_session(&self, sid: Sid, reason: DisconnectReason) {
        let socket = self.sockets.write().unwrap().remove(&sid);
        if let Some(socket) = socket {
            socket.abort_heartbeat();
            self.handler.on_disconnect(socket, reason);
            tracing::debug!(?sid, "session closed, {} remaining", self.socket_count());
        } else {
            tracing::debug!(?sid, "session already closed");
        }
    }

    /// Get a session by id. The ref is cloned out so the map lock is not
    /// held by callers.
    pub fn get_socket(&self, sid: Sid) -> Option<Arc<Socket<H::Data>>> {
        self.sockets.read().unwrap().get(&sid).cloned()
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.read().unwrap().len()
    }

    /// Shut the engine down: refuse new requests and close every session.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let sockets: Vec<_> = self.sockets.read().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.close(DisconnectReason::ServerShuttingDown);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<H: EngineHandler> std::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("socket_count", &self.socket_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
