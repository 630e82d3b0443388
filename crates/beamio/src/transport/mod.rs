//! The two transports a connection can ride on.
//!
//! Both expose request-level entry points invoked by the service dispatcher
//! and feed decoded packets to the engine handler. The send path is always
//! single-writer: the polling encoder or the websocket writer task holds the
//! connection queue lock while draining it.

pub(crate) mod polling;
pub(crate) mod ws;
