//! The seam between the engine and the layer above it.

use std::sync::Arc;

use crate::socket::{DisconnectReason, Socket};

/// An handler for engine connection lifecycle and message events.
///
/// The type implementing this trait is shared by every connection; per
/// connection state lives in the [`Data`](EngineHandler::Data) slot of the
/// [`Socket`].
pub trait EngineHandler: std::fmt::Debug + Send + Sync + 'static {
    /// Data bound to each socket at creation.
    type Data: Default + Send + Sync + 'static;

    /// Called on a fresh connection, right after the handshake was sent.
    fn on_connect(self: &Arc<Self>, socket: Arc<Socket<Self::Data>>);

    /// Called when the connection reached its terminal state.
    fn on_disconnect(&self, socket: Arc<Socket<Self::Data>>, reason: DisconnectReason);

    /// Called for each message packet received from the client.
    fn on_message(&self, msg: String, socket: Arc<Socket<Self::Data>>);

    /// Called for each binary payload received from the client.
    fn on_binary(&self, data: Vec<u8>, socket: Arc<Socket<Self::Data>>);
}
