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
//! A [Socket.IO v5](https://socket.io/docs/v4/socket-io-protocol/) server on
//! top of the [`beamio`] Engine.IO layer.
//!
//! Multiplexed namespaces, rooms, per-event acknowledgements, connect
//! middlewares and optional connection-state recovery, exposed as a tower
//! service or layer.
//!
//! ```no_run
//! use relayio::{extract::{AckSender, Data, SocketRef}, SocketIo};
//! use serde_json::Value;
//!
//! let (svc, io) = SocketIo::new_svc();
//! io.ns("/", |socket: SocketRef| {
//!     socket.on("message", |socket: SocketRef, Data::<Value>(data)| {
//!         socket.broadcast().emit("message", data).ok();
//!     });
//!     socket.on("ping", |ack: AckSender| {
//!         ack.send("pong").ok();
//!     });
//! });
//! // serve `svc` with hyper
//! ```

pub mod ack;
pub mod adapter;
pub mod config;
pub mod errors;
pub mod extract;
pub mod handler;
pub mod layer;
pub mod ns;
pub mod operators;
pub mod packet;
pub mod service;
pub mod socket;

mod client;
mod io;

pub use errors::{AckError, BroadcastError, HandlerError, SendError, SocketError};
pub use io::{SocketIo, SocketIoBuilder};
pub use socket::{DisconnectReason, Socket};

pub use beamio::{Sid, TransportType};
