//! A tower [`Layer`](tower::Layer) wrapping any http service with the
//! Socket.IO stack.

use std::sync::Arc;

use tower::Layer;

use crate::{adapter::Adapter, client::Client, service::SocketIoService};
use beamio::Engine;

/// Wraps an inner service with a [`SocketIoService`]. Every service built by
/// this layer shares the same engine and namespaces.
pub struct SocketIoLayer<A: Adapter> {
    engine: Arc<Engine<Client<A>>>,
}

impl<A: Adapter> SocketIoLayer<A> {
    pub(crate) fn new(engine: Arc<Engine<Client<A>>>) -> Self {
        Self { engine }
    }
}

impl<A: Adapter> Clone for SocketIoLayer<A> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S: Clone, A: Adapter> Layer<S> for SocketIoLayer<A> {
    type Service = SocketIoService<A, S>;

    fn layer(&self, inner: S) -> Self::Service {
        SocketIoService::from_parts(inner, self.engine.clone())
    }
}
