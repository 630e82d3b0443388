//! A minimal chat server: join rooms, broadcast messages, answer pings.
//!
//! Run it and point any Socket.IO v5 client at `http://localhost:3000`.

use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use relayio::{
    extract::{AckSender, Data, SocketRef},
    SocketIo,
};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct JoinMsg {
    room: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (svc, io) = SocketIo::new_svc();

    io.ns("/", |socket: SocketRef| {
        tracing::info!("socket connected: {}", socket.id);

        socket.on("join", |socket: SocketRef, Data(msg): Data<JoinMsg>| {
            socket.join(msg.room.clone());
            socket.to(msg.room).emit("user-joined", socket.id).ok();
        });

        socket.on("message", |socket: SocketRef, Data(data): Data<Value>| {
            socket.broadcast().emit("message", data).ok();
        });

        socket.on("ping", |ack: AckSender| {
            ack.send("pong").ok();
        });

        socket.on_disconnect(|socket: SocketRef| {
            tracing::info!("socket disconnected: {}", socket.id);
        });
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("listening on http://127.0.0.1:3000");
    loop {
        let (stream, _) = listener.accept().await?;
        let svc = TowerToHyperService::new(svc.clone());
        tokio::spawn(async move {
            hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), svc)
                .with_upgrades()
                .await
                .ok();
        });
    }
}
