//! The [`SocketIo`] handle and its builder.

use std::{borrow::Cow, fmt, sync::Arc, time::Duration};

use crate::{
    adapter::{Adapter, LocalAdapter},
    client::Client,
    config::SocketIoConfig,
    handler::ConnectHandler,
    layer::SocketIoLayer,
    operators::BroadcastOperators,
    service::SocketIoService,
    socket::Socket,
};
use beamio::{
    config::EngineConfigBuilder,
    service::{NotFoundService, TransportType},
    Engine, Sid,
};

/// Builder for a [`SocketIo`] server instance.
pub struct SocketIoBuilder<A: Adapter = LocalAdapter> {
    config: SocketIoConfig,
    engine_config_builder: EngineConfigBuilder,
    req_path: String,
    adapter: std::marker::PhantomData<A>,
}

impl SocketIoBuilder<LocalAdapter> {
    pub fn new() -> Self {
        Self {
            config: SocketIoConfig::default(),
            engine_config_builder: EngineConfigBuilder::new(),
            req_path: "/socket.io".to_string(),
            adapter: std::marker::PhantomData,
        }
    }
}

impl Default for SocketIoBuilder<LocalAdapter> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Adapter> SocketIoBuilder<A> {
    /// Swap the adapter type, e.g. for the
    /// [`SessionAwareAdapter`](crate::adapter::SessionAwareAdapter).
    pub fn with_adapter<B: Adapter>(self) -> SocketIoBuilder<B> {
        SocketIoBuilder {
            config: self.config,
            engine_config_builder: self.engine_config_builder,
            req_path: self.req_path,
            adapter: std::marker::PhantomData,
        }
    }

    /// The path to listen for socket.io requests on.
    ///
    /// Defaults to `/socket.io`.
    pub fn req_path(mut self, req_path: impl Into<String>) -> Self {
        self.req_path = req_path.into();
        self
    }

    /// The interval at which the server sends a ping packet to the client.
    ///
    /// Defaults to 25 seconds.
    pub fn ping_interval(mut self, ping_interval: Duration) -> Self {
        self.engine_config_builder = self.engine_config_builder.ping_interval(ping_interval);
        self
    }

    /// How long the server waits for a pong before closing the connection.
    ///
    /// Defaults to 20 seconds.
    pub fn ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.engine_config_builder = self.engine_config_builder.ping_timeout(ping_timeout);
        self
    }

    /// How long the server waits for the upgrade packet on a probing
    /// websocket.
    ///
    /// Defaults to 10 seconds.
    pub fn upgrade_timeout(mut self, upgrade_timeout: Duration) -> Self {
        self.engine_config_builder = self.engine_config_builder.upgrade_timeout(upgrade_timeout);
        self
    }

    /// The number of packet batches buffered per connection before `emit`
    /// errors out.
    ///
    /// Defaults to 128.
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.engine_config_builder = self.engine_config_builder.max_buffer_size(max_buffer_size);
        self
    }

    /// The maximum size of a frame or http request body, in bytes.
    ///
    /// Defaults to 1 MiB.
    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.engine_config_builder = self.engine_config_builder.max_payload(max_payload);
        self
    }

    /// The transports enabled on this server.
    ///
    /// Defaults to polling and websocket.
    pub fn transports<const N: usize>(mut self, transports: [TransportType; N]) -> Self {
        self.engine_config_builder = self.engine_config_builder.transports(transports);
        self
    }

    /// How long an emit waits for its acknowledgement.
    ///
    /// Defaults to 5 seconds.
    pub fn ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.config.ack_timeout = ack_timeout;
        self
    }

    /// How long a connection may stay outside every namespace before being
    /// dropped.
    ///
    /// Defaults to 45 seconds.
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.config.connect_timeout = connect_timeout;
        self
    }

    fn into_parts(mut self) -> (Arc<Client<A>>, Arc<Engine<Client<A>>>, SocketIo<A>) {
        self.config.engine_config = self.engine_config_builder.req_path(self.req_path).build();
        let engine_config = self.config.engine_config.clone();
        let client = Arc::new(Client::new(Arc::new(self.config)));
        let engine = Arc::new(Engine::new(client.clone(), engine_config));
        let io = SocketIo {
            client: client.clone(),
            engine: engine.clone(),
        };
        (client, engine, io)
    }

    /// Build a standalone [`SocketIoService`] answering 404 to non-socket.io
    /// requests, plus the [`SocketIo`] handle.
    pub fn build_svc(self) -> (SocketIoService<A, NotFoundService>, SocketIo<A>) {
        let (_, engine, io) = self.into_parts();
        (SocketIoService::from_parts(NotFoundService, engine), io)
    }

    /// Build a [`SocketIoService`] wrapping a custom inner service, plus the
    /// [`SocketIo`] handle.
    pub fn build_with_inner_svc<S: Clone>(self, svc: S) -> (SocketIoService<A, S>, SocketIo<A>) {
        let (_, engine, io) = self.into_parts();
        (SocketIoService::from_parts(svc, engine), io)
    }

    /// Build a tower [`SocketIoLayer`], plus the [`SocketIo`] handle.
    pub fn build_layer(self) -> (SocketIoLayer<A>, SocketIo<A>) {
        let (_, engine, io) = self.into_parts();
        (SocketIoLayer::new(engine), io)
    }
}

/// The handle to a Socket.IO server: namespace registration, server-wide
/// broadcasts and shutdown. Cheap to clone and move anywhere.
pub struct SocketIo<A: Adapter = LocalAdapter> {
    client: Arc<Client<A>>,
    engine: Arc<Engine<Client<A>>>,
}

impl SocketIo<LocalAdapter> {
    /// A [`SocketIoBuilder`] with the default configuration.
    pub fn builder() -> SocketIoBuilder<LocalAdapter> {
        SocketIoBuilder::new()
    }

    /// Build a standalone service with the default configuration.
    pub fn new_svc() -> (
        SocketIoService<LocalAdapter, NotFoundService>,
        SocketIo<LocalAdapter>,
    ) {
        Self::builder().build_svc()
    }

    /// Build a tower layer with the default configuration.
    pub fn new_layer() -> (SocketIoLayer<LocalAdapter>, SocketIo<LocalAdapter>) {
        Self::builder().build_layer()
    }
}

impl<A: Adapter> SocketIo<A> {
    /// The config in use.
    #[inline]
    pub fn config(&self) -> &SocketIoConfig {
        &self.client.config
    }

    /// Register a handler for the connect event of a namespace.
    ///
    /// The handler can have middlewares attached with
    /// [`ConnectHandler::with`].
    pub fn ns<C, T>(&self, path: impl Into<Cow<'static, str>>, handler: C)
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        self.client.add_ns(path.into(), handler)
    }

    /// Accept CONNECT packets for namespaces that were never registered,
    /// creating them on demand with the given handler.
    pub fn accept_any_namespace<C, T>(&self, handler: C)
    where
        C: ConnectHandler<A, T>,
        T: Send + Sync + 'static,
    {
        self.client.accept_any_namespace(handler)
    }

    /// Delete a namespace, disconnecting every socket connected to it.
    pub fn delete_ns(&self, path: &str) {
        self.client.delete_ns(path)
    }

    /// Broadcast operators rooted at the given namespace, or `None` when it
    /// does not exist.
    pub fn of(&self, path: &str) -> Option<BroadcastOperators<A>> {
        self.client.get_ns(path).map(BroadcastOperators::from_ns)
    }

    /// Get a socket of the main namespace by id.
    pub fn get_socket(&self, sid: Sid) -> Option<Arc<Socket<A>>> {
        self.client
            .get_ns("/")
            .and_then(|ns| ns.get_socket(sid).ok())
    }

    /// Gracefully shut the server down: disconnect every socket, close every
    /// connection and answer any further request with `418 I'm a teapot`.
    pub fn close(&self) {
        self.client.close();
        self.engine.close();
    }
}

impl<A: Adapter> Clone for SocketIo<A> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<A: Adapter> fmt::Debug for SocketIo<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketIo")
            .field("client", &self.client)
            .field("engine", &self.engine)
            .finish()
    }
}
