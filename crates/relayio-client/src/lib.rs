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
//! A Socket.IO v5 client over the websocket transport.
//!
//! The [`Client`] plays the manager role: it owns one engine connection,
//! multiplexes the per-namespace [`ClientSocket`]s over it and transparently
//! reconnects with exponential backoff when the connection drops.
//!
//! ```no_run
//! use relayio_client::ClientBuilder;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), relayio_client::Error> {
//! let client = ClientBuilder::new("http://localhost:3000").connect().await?;
//! let socket = client.socket("/").await?;
//! socket.on("message", |data, _bin| {
//!     println!("received: {data}");
//! });
//! socket.emit("message", json!({ "hello": "world" }))?;
//! # Ok(())
//! # }
//! ```

mod backoff;
mod client;
mod error;
mod socket;

pub use client::{Client, ClientBuilder};
pub use error::Error;
pub use socket::{AckResponse, ClientSocket};
