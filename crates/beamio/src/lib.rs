#![warn(
    clippy::all,
    clippy::todo,
    clippy::empty_enum,
    clippy::mem_forget,
    clippy::needless_continue,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style
)]
//! An [Engine.IO v4](https://socket.io/docs/v4/engine-io-protocol/) server
//! implementation exposed as a [`tower::Service`].
//!
//! Connections start on HTTP long-polling and may upgrade in-flight to a
//! websocket. The engine owns the heartbeat, the upgrade arbitration and the
//! close lifecycle; everything application-level is delegated to an
//! [`EngineHandler`](handler::EngineHandler).

pub use engine::Engine;
pub use packet::{OpenPacket, Packet};
pub use service::TransportType;
pub use sid::Sid;
pub use socket::{DisconnectReason, Socket};

pub mod body;
pub mod config;
pub mod errors;
pub mod handler;
pub mod layer;
pub mod service;
pub mod sid;
pub mod socket;

mod engine;
mod packet;
mod payload;
mod peekable;
mod transport;
