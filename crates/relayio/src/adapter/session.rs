//! Session-aware adapter: the in-memory core plus everything needed for
//! connection-state recovery.
//!
//! Every event broadcast without an acknowledgement gets an opaque offset id
//! appended as its last argument and is kept in a bounded-by-time buffer. A
//! reconnecting client hands back its private session id and the last offset
//! it saw; the adapter replays what it missed.

use std::{
    sync::{Mutex, Weak},
    time::{Duration, Instant},
};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    yeast::Yeaster, Adapter, BroadcastOptions, CoreLocalAdapter, Room,
};
use crate::{
    ack::AckStream,
    errors::BroadcastError,
    ns::Namespace,
    operators::RoomParam,
    packet::{Packet, PacketData},
    socket::Socket,
};
use beamio::Sid;

/// How long a disconnected session stays restorable.
pub const DEFAULT_MAX_DISCONNECT_DURATION: Duration = Duration::from_secs(2 * 60);

/// The sweep period for expired sessions and packets.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// The state of a socket worth restoring after a short disconnect.
#[derive(Debug, Clone)]
pub struct Session {
    /// The public socket id at disconnect time.
    pub sid: Sid,
    /// The private id handed to the client in the connect reply.
    pub pid: Sid,
    /// The rooms the socket was in.
    pub rooms: Vec<Room>,
    /// Filled by [`Adapter::restore_session`]: the qualifying packets
    /// broadcast after the client's offset, in emission order.
    pub missed_packets: Vec<Packet<'static>>,
}

#[derive(Debug)]
struct PersistedPacket {
    id: String,
    emitted_at: Instant,
    opts: BroadcastOptions,
    packet: Packet<'static>,
}

impl PersistedPacket {
    fn has_expired(&self, max_disconnect_duration: Duration) -> bool {
        self.emitted_at.elapsed() > max_disconnect_duration
    }
}

#[derive(Debug)]
struct StoredSession {
    session: Session,
    disconnected_at: Instant,
}

impl StoredSession {
    fn has_expired(&self, max_disconnect_duration: Duration) -> bool {
        self.disconnected_at.elapsed() > max_disconnect_duration
    }
}

#[derive(Debug, Default)]
struct RecoveryState {
    sessions: std::collections::HashMap<Sid, StoredSession>,
    packets: Vec<PersistedPacket>,
}

/// A [`LocalAdapter`](super::LocalAdapter) that also persists sessions and
/// event packets for connection-state recovery.
#[derive(Debug)]
pub struct SessionAwareAdapter {
    core: CoreLocalAdapter<SessionAwareAdapter>,
    ns: Weak<Namespace<SessionAwareAdapter>>,
    max_disconnect_duration: Duration,
    yeaster: Mutex<Yeaster>,
    state: Mutex<RecoveryState>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionAwareAdapter {
    /// Drop expired sessions and packets. The packet buffer is scanned in
    /// full: concurrent broadcasts make strict emission-time ordering of the
    /// buffer too weak an assumption to stop at the first live entry.
    fn cleanup(&self) {
        let mut state = self.state.lock().unwrap();
        let max = self.max_disconnect_duration;
        state.sessions.retain(|_, session| !session.has_expired(max));
        state.packets.retain(|packet| !packet.has_expired(max));
    }
}

impl Adapter for SessionAwareAdapter {
    fn new(ns: Weak<Namespace<Self>>) -> Self {
        Self {
            core: CoreLocalAdapter::new(ns.clone()),
            ns,
            max_disconnect_duration: DEFAULT_MAX_DISCONNECT_DURATION,
            yeaster: Mutex::new(Yeaster::default()),
            state: Mutex::new(RecoveryState::default()),
            sweeper: Mutex::new(None),
        }
    }

    /// Start the background sweeper. It holds only a weak ref to the
    /// namespace so a dropped namespace stops it as well.
    fn init(&self) {
        let ns = self.ns.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(CLEANUP_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                match ns.upgrade() {
                    Some(ns) => ns.adapter.cleanup(),
                    None => break,
                }
            }
        });
        self.sweeper.lock().unwrap().replace(handle);
    }

    fn close(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn add_all(&self, sid: Sid, rooms: impl RoomParam) {
        self.core.add_all(sid, rooms);
    }

    fn del(&self, sid: Sid, rooms: impl RoomParam) {
        self.core.del(sid, rooms);
    }

    fn del_all(&self, sid: Sid) {
        self.core.del_all(sid);
    }

    /// Event broadcasts without an ack id are made recoverable: an offset id
    /// is appended to the payload and the packet is buffered before the
    /// regular fan-out.
    fn broadcast(
        &self,
        mut packet: Packet<'static>,
        opts: BroadcastOptions,
    ) -> Result<(), BroadcastError> {
        if let PacketData::Event(_, ref mut data, None) = packet.inner {
            let id = self.yeaster.lock().unwrap().yeast();
            match data {
                Value::Array(args) => args.push(Value::String(id.clone())),
                other => *other = Value::Array(vec![other.take(), Value::String(id.clone())]),
            }
            let persisted = PersistedPacket {
                id,
                emitted_at: Instant::now(),
                opts: opts.clone(),
                packet: packet.clone(),
            };
            self.state.lock().unwrap().packets.push(persisted);
        }
        self.core.broadcast(packet, &opts)
    }

    fn broadcast_with_ack<V: DeserializeOwned>(
        &self,
        packet: Packet<'static>,
        opts: BroadcastOptions,
    ) -> AckStream<V> {
        let timeout = self
            .ns
            .upgrade()
            .map(|ns| ns.ack_timeout())
            .unwrap_or(Duration::from_secs(5));
        self.core.broadcast_with_ack(packet, &opts, timeout).into()
    }

    fn sockets(&self, rooms: impl RoomParam) -> Vec<Sid> {
        self.core.sockets(rooms)
    }

    fn socket_rooms(&self, sid: Sid) -> Vec<Room> {
        self.core.socket_rooms(sid)
    }

    fn fetch_sockets(&self, opts: BroadcastOptions) -> Vec<std::sync::Arc<Socket<Self>>> {
        self.core.apply_opts(&opts)
    }

    fn add_sockets(&self, opts: BroadcastOptions, rooms: impl RoomParam) {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        for socket in self.core.apply_opts(&opts) {
            self.add_all(socket.id, rooms.clone());
        }
    }

    fn del_sockets(&self, opts: BroadcastOptions, rooms: impl RoomParam) {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        for socket in self.core.apply_opts(&opts) {
            self.del(socket.id, rooms.clone());
        }
    }

    fn disconnect_sockets(&self, opts: BroadcastOptions) -> Result<(), BroadcastError> {
        self.core.disconnect_sockets(&opts)
    }

    fn supports_recovery(&self) -> bool {
        true
    }

    fn persist_session(&self, session: Session) {
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(
            session.pid,
            StoredSession {
                session,
                disconnected_at: Instant::now(),
            },
        );
    }

    fn restore_session(&self, pid: Sid, offset: &str) -> Option<Session> {
        let mut state = self.state.lock().unwrap();

        let expired = state
            .sessions
            .get(&pid)?
            .has_expired(self.max_disconnect_duration);
        if expired {
            state.sessions.remove(&pid);
            return None;
        }

        // A failed offset lookup leaves the session in place so the client
        // can retry with a better offset.
        let index = state.packets.iter().position(|packet| packet.id == offset)?;

        // Evicted only now: a session restores once.
        let stored = state.sessions.remove(&pid)?;

        let mut session = stored.session;
        session.missed_packets = state.packets[index + 1..]
            .iter()
            .filter(|packet| should_include_packet(&session.rooms, &packet.opts))
            .map(|packet| packet.packet.clone())
            .collect();
        Some(session)
    }
}

/// Would a socket in `session_rooms` have received a broadcast with `opts`?
fn should_include_packet(session_rooms: &[Room], opts: &BroadcastOptions) -> bool {
    let included = opts.rooms.is_empty()
        || session_rooms.iter().any(|room| opts.rooms.contains(room));
    let not_excluded = !session_rooms.iter().any(|room| opts.except.contains(room));
    included && not_excluded
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::adapter::BroadcastFlags;

    fn broadcast_event(adapter: &SessionAwareAdapter, data: Value, rooms: Vec<Room>) {
        let packet = Packet::event("/", "m", data).into_static();
        let mut opts = BroadcastOptions::default();
        opts.rooms = rooms;
        opts.flags.insert(BroadcastFlags::Broadcast);
        adapter.broadcast(packet, opts).unwrap();
    }

    fn offset_of(adapter: &SessionAwareAdapter, index: usize) -> String {
        adapter.state.lock().unwrap().packets[index].id.clone()
    }

    #[tokio::test]
    async fn broadcast_appends_offset() {
        let ns = Namespace::<SessionAwareAdapter>::new_dummy([]);
        let adapter = SessionAwareAdapter::new(Arc::downgrade(&ns));

        broadcast_event(&adapter, json!(["hello"]), vec![]);

        let state = adapter.state.lock().unwrap();
        assert_eq!(state.packets.len(), 1);
        let packet = &state.packets[0];
        match &packet.packet.inner {
            PacketData::Event(_, Value::Array(args), None) => {
                assert_eq!(args[0], json!("hello"));
                assert_eq!(args[1], Value::String(packet.id.clone()));
            }
            p => panic!("unexpected packet: {p:?}"),
        }
    }

    #[tokio::test]
    async fn acked_events_are_not_persisted() {
        let ns = Namespace::<SessionAwareAdapter>::new_dummy([]);
        let adapter = SessionAwareAdapter::new(Arc::downgrade(&ns));

        let mut packet = Packet::event("/", "m", json!(["hello"])).into_static();
        packet.inner.set_ack_id(1);
        adapter.broadcast(packet, BroadcastOptions::default()).unwrap();

        assert!(adapter.state.lock().unwrap().packets.is_empty());
    }

    #[tokio::test]
    async fn restore_returns_packets_after_offset() {
        let ns = Namespace::<SessionAwareAdapter>::new_dummy([]);
        let adapter = SessionAwareAdapter::new(Arc::downgrade(&ns));

        broadcast_event(&adapter, json!(["hello"]), vec![]);
        let offset = offset_of(&adapter, 0);

        let session = Session {
            sid: Sid::new(),
            pid: Sid::new(),
            rooms: vec!["room1".into()],
            missed_packets: vec![],
        };
        adapter.persist_session(session.clone());

        broadcast_event(&adapter, json!(["m1"]), vec![]);
        broadcast_event(&adapter, json!(["m2"]), vec![]);

        let restored = adapter.restore_session(session.pid, &offset).unwrap();
        assert_eq!(restored.missed_packets.len(), 2);

        // restoring twice does not work
        assert!(adapter.restore_session(session.pid, &offset).is_none());
    }

    #[tokio::test]
    async fn restore_filters_by_rooms() {
        let ns = Namespace::<SessionAwareAdapter>::new_dummy([]);
        let adapter = SessionAwareAdapter::new(Arc::downgrade(&ns));

        broadcast_event(&adapter, json!(["hello"]), vec![]);
        let offset = offset_of(&adapter, 0);

        let session = Session {
            sid: Sid::new(),
            pid: Sid::new(),
            rooms: vec!["room1".into()],
            missed_packets: vec![],
        };
        adapter.persist_session(session.clone());

        broadcast_event(&adapter, json!(["for room1"]), vec!["room1".into()]);
        broadcast_event(&adapter, json!(["for room2"]), vec!["room2".into()]);
        broadcast_event(&adapter, json!(["for everyone"]), vec![]);

        let restored = adapter.restore_session(session.pid, &offset).unwrap();
        assert_eq!(restored.missed_packets.len(), 2);
    }

    #[tokio::test]
    async fn failed_restore_keeps_the_session() {
        let ns = Namespace::<SessionAwareAdapter>::new_dummy([]);
        let adapter = SessionAwareAdapter::new(Arc::downgrade(&ns));

        broadcast_event(&adapter, json!(["hello"]), vec![]);
        let offset = offset_of(&adapter, 0);

        let session = Session {
            sid: Sid::new(),
            pid: Sid::new(),
            rooms: vec![],
            missed_packets: vec![],
        };
        adapter.persist_session(session.clone());
        broadcast_event(&adapter, json!(["m1"]), vec![]);

        // an unknown pid restores nothing
        assert!(adapter.restore_session(Sid::new(), &offset).is_none());
        // an unknown offset restores nothing and must not evict the session
        assert!(adapter.restore_session(session.pid, "unknown").is_none());

        // the session is still there and restores with the right offset
        let restored = adapter.restore_session(session.pid, &offset).unwrap();
        assert_eq!(restored.missed_packets.len(), 1);
    }

    #[test]
    fn include_packet_filter() {
        let rooms: Vec<Room> = vec!["room1".into()];

        let mut opts = BroadcastOptions::default();
        assert!(should_include_packet(&rooms, &opts));

        opts.rooms = vec!["room1".into()];
        assert!(should_include_packet(&rooms, &opts));

        opts.rooms = vec!["room2".into()];
        assert!(!should_include_packet(&rooms, &opts));

        opts.rooms = vec![];
        opts.except = vec!["room1".into()];
        assert!(!should_include_packet(&rooms, &opts));
    }
}
