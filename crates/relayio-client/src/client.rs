//! The [`Client`] (the protocol calls it the *manager*): one engine
//! connection, many namespace sockets, transparent reconnection.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use futures::{stream::SplitStream, SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::{backoff::Backoff, error::Error, socket::ClientSocket};
use relayio::packet::{Packet, PacketData};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Builder for a [`Client`].
pub struct ClientBuilder {
    url: String,
    reconnection: bool,
    reconnection_attempts: u32,
    reconnection_delay: Duration,
    reconnection_delay_max: Duration,
    randomization_factor: f64,
}

impl ClientBuilder {
    /// Start a builder for the given server url (`http://` or `ws://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnection: true,
            reconnection_attempts: 0,
            reconnection_delay: Duration::from_secs(1),
            reconnection_delay_max: Duration::from_secs(5),
            randomization_factor: 0.5,
        }
    }

    /// Disable automatic reconnection.
    pub fn no_reconnection(mut self) -> Self {
        self.reconnection = false;
        self
    }

    /// Maximum number of reconnection attempts. `0` means unlimited.
    pub fn reconnection_attempts(mut self, attempts: u32) -> Self {
        self.reconnection_attempts = attempts;
        self
    }

    /// The base delay between reconnection attempts.
    ///
    /// Defaults to 1 second.
    pub fn reconnection_delay(mut self, delay: Duration) -> Self {
        self.reconnection_delay = delay;
        self
    }

    /// The maximum delay between reconnection attempts.
    ///
    /// Defaults to 5 seconds.
    pub fn reconnection_delay_max(mut self, delay: Duration) -> Self {
        self.reconnection_delay_max = delay;
        self
    }

    /// The jitter applied to reconnection delays, between 0 and 1.
    ///
    /// Defaults to 0.5.
    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    /// Dial the server and return the connected client.
    pub async fn connect(self) -> Result<Client, Error> {
        let ws_url = ws_url(&self.url)?;
        let inner = Arc::new(ClientInner {
            ws_url,
            reconnection: self.reconnection,
            reconnection_attempts: self.reconnection_attempts,
            backoff: Mutex::new(Backoff::new(
                self.reconnection_delay,
                self.reconnection_delay_max,
                self.randomization_factor,
            )),
            state: Mutex::new(ConnState::Disconnected),
            sockets: RwLock::new(HashMap::new()),
            out_tx: Mutex::new(None),
            partial_bin_packet: Mutex::new(None),
        });
        inner.connect().await?;
        Ok(Client { inner })
    }
}

/// Turn the user-facing url into the engine websocket endpoint.
fn ws_url(url: &str) -> Result<String, Error> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
    let scheme = match scheme {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(Error::InvalidUrl(url.to_string())),
    };
    let host = rest.split('/').next().unwrap_or(rest);
    Ok(format!(
        "{scheme}://{host}/socket.io/?EIO=4&transport=websocket"
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

pub(crate) struct ClientInner {
    ws_url: String,
    reconnection: bool,
    reconnection_attempts: u32,
    backoff: Mutex<Backoff>,
    state: Mutex<ConnState>,
    sockets: RwLock<HashMap<String, Arc<ClientSocket>>>,
    /// Writer half of the live connection; `None` while disconnected.
    out_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// A binary packet waiting for its attachments.
    partial_bin_packet: Mutex<Option<Packet<'static>>>,
}

impl ClientInner {
    /// Dial the server, perform the engine handshake and start the
    /// read/write tasks.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<(), Error> {
        *self.state.lock().unwrap() = ConnState::Connecting;

        let (mut ws, _) = connect_async(self.ws_url.as_str()).await.map_err(|e| {
            *self.state.lock().unwrap() = ConnState::Disconnected;
            Error::from(e)
        })?;

        // The first frame must be the engine handshake.
        let open = match ws.next().await {
            Some(Ok(Message::Text(text))) => beamio::Packet::try_from(text.as_str()),
            _ => {
                *self.state.lock().unwrap() = ConnState::Disconnected;
                return Err(Error::BadHandshake);
            }
        };
        match open {
            Ok(beamio::Packet::Open(_)) => (),
            _ => {
                *self.state.lock().unwrap() = ConnState::Disconnected;
                return Err(Error::BadHandshake);
            }
        }

        let (mut tx, rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        self.out_tx.lock().unwrap().replace(out_tx);
        self.partial_bin_packet.lock().unwrap().take();

        // Writer task: drains the outgoing queue into the websocket.
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            tx.close().await.ok();
        });

        // Reader task: runs until the connection dies.
        let client = self.clone();
        tokio::spawn(client.run(rx));

        *self.state.lock().unwrap() = ConnState::Connected;
        self.backoff.lock().unwrap().reset();

        // Join every known namespace again.
        let sockets: Vec<_> = self.sockets.read().unwrap().values().cloned().collect();
        for socket in sockets {
            socket.send_connect().ok();
        }
        Ok(())
    }

    pub(crate) fn connected(&self) -> bool {
        *self.state.lock().unwrap() == ConnState::Connected
    }

    /// Queue a raw websocket message.
    pub(crate) fn send(&self, msg: Message) -> Result<(), Error> {
        self.out_tx
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|tx| tx.send(msg).ok())
            .ok_or(Error::Closed)
    }

    /// Encode and send a socket.io packet with its attachments.
    pub(crate) fn send_packet(&self, packet: Packet<'_>) -> Result<(), Error> {
        let bins = match &packet.inner {
            PacketData::BinaryEvent(_, bin, _) | PacketData::BinaryAck(bin, _) => bin.bin.clone(),
            _ => vec![],
        };
        let msg: String = packet.try_into()?;
        self.send(Message::Text(format!("4{msg}")))?;
        for bin in bins {
            self.send(Message::Binary(bin))?;
        }
        Ok(())
    }

    async fn run(self: Arc<Self>, mut rx: SplitStream<WsStream>) {
        while let Some(msg) = rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if self.handle_text(text).is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(bin)) => self.handle_binary(bin),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => (),
            }
        }
        self.on_close();
    }

    fn handle_text(self: &Arc<Self>, text: String) -> Result<(), Error> {
        match beamio::Packet::try_from(text).map_err(|_| Error::InvalidPacket)? {
            // the server drives the heartbeat, we only answer
            beamio::Packet::Ping => self.send(Message::Text("3".to_string())),
            beamio::Packet::Message(msg) => {
                let packet = Packet::try_from(msg).map_err(|_| Error::InvalidPacket)?;
                if packet.inner.is_binary() {
                    self.partial_bin_packet.lock().unwrap().replace(packet);
                } else {
                    self.route_packet(packet);
                }
                Ok(())
            }
            beamio::Packet::Close => Err(Error::Closed),
            _ => Ok(()),
        }
    }

    fn handle_binary(self: &Arc<Self>, bin: Vec<u8>) {
        let mut partial = self.partial_bin_packet.lock().unwrap();
        let complete = match partial.as_mut().map(|p| &mut p.inner) {
            Some(PacketData::BinaryEvent(_, bin_packet, _) | PacketData::BinaryAck(bin_packet, _)) => {
                bin_packet.add_payload(bin);
                bin_packet.is_complete()
            }
            _ => {
                tracing::debug!("binary frame without a pending binary packet");
                false
            }
        };
        if complete {
            let packet = partial.take().unwrap();
            drop(partial);
            self.route_packet(packet);
        }
    }

    fn route_packet(self: &Arc<Self>, packet: Packet<'static>) {
        let socket = self.sockets.read().unwrap().get(packet.ns.as_ref()).cloned();
        match socket {
            Some(socket) => socket.handle_packet(packet.inner),
            None => tracing::debug!("packet for unknown namespace {}", packet.ns),
        }
    }

    /// The connection died: flip the state and schedule a reconnection
    /// unless it was a deliberate close.
    fn on_close(self: &Arc<Self>) {
        self.out_tx.lock().unwrap().take();
        {
            let mut state = self.state.lock().unwrap();
            if *state == ConnState::Disconnected {
                return; // deliberate close, stay down
            }
            if !self.reconnection {
                *state = ConnState::Disconnected;
                return;
            }
            if *state == ConnState::Reconnecting {
                return;
            }
            *state = ConnState::Reconnecting;
        }

        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let (attempts, delay) = {
                    let mut backoff = client.backoff.lock().unwrap();
                    (backoff.attempts(), backoff.duration())
                };
                if client.reconnection_attempts > 0 && attempts >= client.reconnection_attempts {
                    tracing::debug!("reconnection attempts exhausted");
                    *client.state.lock().unwrap() = ConnState::Disconnected;
                    return;
                }

                tokio::time::sleep(delay).await;
                tracing::debug!("reconnection attempt {}", attempts + 1);
                match client.connect().await {
                    Ok(()) => return,
                    Err(_e) => {
                        tracing::debug!("reconnection failed: {_e}");
                        *client.state.lock().unwrap() = ConnState::Reconnecting;
                    }
                }
            }
        });
    }

    /// Deliberately close the connection; no reconnection follows.
    pub(crate) fn close(&self) {
        *self.state.lock().unwrap() = ConnState::Disconnected;
        // engine close packet, best effort
        if let Some(tx) = self.out_tx.lock().unwrap().take() {
            tx.send(Message::Text("1".to_string())).ok();
            tx.send(Message::Close(None)).ok();
        }
    }

    pub(crate) fn register_socket(self: &Arc<Self>, ns: String) -> Arc<ClientSocket> {
        let socket = Arc::new(ClientSocket::new(ns.clone(), Arc::downgrade(self)));
        self.sockets
            .write()
            .unwrap()
            .insert(ns, socket.clone());
        socket
    }

    pub(crate) fn get_socket(&self, ns: &str) -> Option<Arc<ClientSocket>> {
        self.sockets.read().unwrap().get(ns).cloned()
    }
}

/// The manager of one Socket.IO connection.
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Get or create the socket of a namespace and wait for the server's
    /// connect reply.
    pub async fn socket(&self, ns: &str) -> Result<Arc<ClientSocket>, Error> {
        let ns = if ns.is_empty() { "/" } else { ns };
        if let Some(socket) = self.inner.get_socket(ns) {
            return Ok(socket);
        }
        let socket = self.inner.register_socket(ns.to_string());
        socket.connect().await?;
        Ok(socket)
    }

    /// Whether the underlying connection is up.
    pub fn connected(&self) -> bool {
        self.inner.connected()
    }

    /// Close the connection for good. No reconnection follows.
    pub fn disconnect(&self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.ws_url)
            .field("connected", &self.connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_schemes() {
        assert_eq!(
            ws_url("http://localhost:3000").unwrap(),
            "ws://localhost:3000/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            ws_url("https://example.com/ignored").unwrap(),
            "wss://example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            ws_url("ws://example.com").unwrap(),
            "ws://example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert!(ws_url("ftp://example.com").is_err());
        assert!(ws_url("example.com").is_err());
    }
}
