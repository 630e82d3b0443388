//! A [`ClientSocket`] is the client end of one namespace.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, RwLock, Weak,
    },
    time::Duration,
};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{client::ClientInner, error::Error};
use relayio::packet::{Packet, PacketData};

/// An acknowledgement answered by the server.
#[derive(Debug)]
pub struct AckResponse {
    /// The data of the ack.
    pub data: Value,
    /// The binary payloads of the ack, empty when there are none.
    pub binary: Vec<Vec<u8>>,
}

type Callback = Arc<dyn Fn(Value, Vec<Vec<u8>>) + Send + Sync>;

/// The client end of one namespace: event callbacks, emits and
/// acknowledgements, multiplexed over the manager's connection.
pub struct ClientSocket {
    ns: String,
    client: Weak<ClientInner>,

    /// The server-assigned socket id, once connected.
    sid: Mutex<Option<String>>,
    /// Resolves the pending `connect()` call.
    connect_tx: Mutex<Option<oneshot::Sender<Result<(), String>>>>,

    callbacks: RwLock<HashMap<String, Callback>>,

    acks: Mutex<HashMap<i64, oneshot::Sender<AckResponse>>>,
    ack_counter: AtomicI64,
}

impl ClientSocket {
    pub(crate) fn new(ns: String, client: Weak<ClientInner>) -> Self {
        Self {
            ns,
            client,
            sid: Mutex::new(None),
            connect_tx: Mutex::new(None),
            callbacks: RwLock::new(HashMap::new()),
            acks: Mutex::new(HashMap::new()),
            ack_counter: AtomicI64::new(0),
        }
    }

    /// The namespace of this socket.
    pub fn ns(&self) -> &str {
        &self.ns
    }

    /// The server-assigned socket id, `None` until connected.
    pub fn sid(&self) -> Option<String> {
        self.sid.lock().unwrap().clone()
    }

    /// Register a callback for an event. One callback per event; the last
    /// registration wins.
    pub fn on(&self, event: impl Into<String>, callback: impl Fn(Value, Vec<Vec<u8>>) + Send + Sync + 'static) {
        self.callbacks
            .write()
            .unwrap()
            .insert(event.into(), Arc::new(callback));
    }

    /// Emit an event to the server.
    pub fn emit(&self, event: impl Into<String>, data: impl Serialize) -> Result<(), Error> {
        let data = serde_json::to_value(data)?;
        let packet = Packet::event(self.ns.clone(), event.into(), data);
        self.send(packet)
    }

    /// Emit an event with binary attachments.
    pub fn emit_binary(
        &self,
        event: impl Into<String>,
        data: impl Serialize,
        bin: Vec<Vec<u8>>,
    ) -> Result<(), Error> {
        let data = serde_json::to_value(data)?;
        let packet = Packet::bin_event(self.ns.clone(), event.into(), data, bin);
        self.send(packet)
    }

    /// Emit an event and wait for the server's acknowledgement.
    pub async fn emit_with_ack(
        &self,
        event: impl Into<String>,
        data: impl Serialize,
        timeout: Duration,
    ) -> Result<AckResponse, Error> {
        let data = serde_json::to_value(data)?;
        let mut packet = Packet::event(self.ns.clone(), event.into(), data);

        let ack_id = self.ack_counter.fetch_add(1, Ordering::SeqCst) + 1;
        packet.inner.set_ack_id(ack_id);

        let (tx, rx) = oneshot::channel();
        self.acks.lock().unwrap().insert(ack_id, tx);
        self.send(packet)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(res)) => Ok(res),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                self.acks.lock().unwrap().remove(&ack_id);
                Err(Error::AckTimeout)
            }
        }
    }

    /// Leave the namespace. The connection and its other sockets live on.
    pub fn disconnect(&self) -> Result<(), Error> {
        self.send(Packet::disconnect(&self.ns))
    }

    /// Send the CONNECT packet and wait for the server's answer.
    pub(crate) async fn connect(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        self.connect_tx.lock().unwrap().replace(tx);
        self.send_connect()?;

        match tokio::time::timeout(Duration::from_secs(5), rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(Error::ConnectionRefused(message)),
            Ok(Err(_)) | Err(_) => Err(Error::Closed),
        }
    }

    /// Send the CONNECT packet, also used when the manager reconnects.
    pub(crate) fn send_connect(&self) -> Result<(), Error> {
        let packet = Packet {
            inner: PacketData::Connect(Some("{}".to_string())),
            ns: self.ns.clone().into(),
        };
        self.send(packet)
    }

    fn send(&self, packet: Packet<'_>) -> Result<(), Error> {
        let client = self.client.upgrade().ok_or(Error::Closed)?;
        client.send_packet(packet)
    }

    /// Dispatch a packet addressed to this namespace.
    pub(crate) fn handle_packet(self: &Arc<Self>, packet: PacketData<'static>) {
        match packet {
            PacketData::Connect(data) => {
                let sid = data
                    .as_deref()
                    .and_then(|data| serde_json::from_str::<Value>(data).ok())
                    .and_then(|v| v.get("sid").and_then(Value::as_str).map(str::to_string));
                *self.sid.lock().unwrap() = sid;
                if let Some(tx) = self.connect_tx.lock().unwrap().take() {
                    tx.send(Ok(())).ok();
                }
            }
            PacketData::ConnectError(message) => {
                if let Some(tx) = self.connect_tx.lock().unwrap().take() {
                    tx.send(Err(message.to_string())).ok();
                }
            }
            PacketData::Event(event, data, ack_id) => {
                self.dispatch_event(&event, data, vec![], ack_id);
            }
            PacketData::BinaryEvent(event, bin, ack_id) => {
                let (data, bins) = split_args(bin.data, bin.bin);
                self.dispatch_event(&event, data, bins, ack_id);
            }
            PacketData::EventAck(data, ack_id) => {
                self.resolve_ack(ack_id, data, vec![]);
            }
            PacketData::BinaryAck(bin, ack_id) => {
                let (data, bins) = split_args(bin.data, bin.bin);
                self.resolve_ack(ack_id, data, bins);
            }
            PacketData::Disconnect => {
                *self.sid.lock().unwrap() = None;
            }
        }
    }

    fn dispatch_event(
        self: &Arc<Self>,
        event: &str,
        data: Value,
        bins: Vec<Vec<u8>>,
        ack_id: Option<i64>,
    ) {
        let callback = self.callbacks.read().unwrap().get(event).cloned();
        if let Some(callback) = callback {
            callback(data, bins);
        }
        // Answer server-side acknowledgement requests so the server's ack
        // aggregation resolves, whether or not a callback was registered.
        if let Some(ack_id) = ack_id {
            self.send(Packet::ack(&self.ns, Value::Array(vec![]), ack_id))
                .ok();
        }
    }

    fn resolve_ack(&self, ack_id: i64, data: Value, binary: Vec<Vec<u8>>) {
        match self.acks.lock().unwrap().remove(&ack_id) {
            Some(tx) => {
                tx.send(AckResponse { data, binary }).ok();
            }
            None => tracing::debug!("ack {ack_id} has no pending request"),
        }
    }
}

/// Strip the top-level placeholder markers of a reassembled payload, as the
/// server does before dispatch.
fn split_args(data: Value, bins: Vec<Vec<u8>>) -> (Value, Vec<Vec<u8>>) {
    let is_placeholder = |v: &Value| {
        v.as_object()
            .and_then(|o| o.get("_placeholder"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    let data = match data {
        Value::Array(args) => Value::Array(args.into_iter().filter(|v| !is_placeholder(v)).collect()),
        v => v,
    };
    (data, bins)
}

impl std::fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSocket")
            .field("ns", &self.ns)
            .field("sid", &self.sid())
            .finish()
    }
}
