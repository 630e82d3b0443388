//! Adapters own the room-membership state of a namespace and the broadcast
//! fan-out.
//!
//! The [`LocalAdapter`] keeps everything in process memory; the
//! [`SessionAwareAdapter`](session::SessionAwareAdapter) wraps the same core
//! with packet persistence for connection-state recovery. Other
//! implementations (e.g. cross-node ones) plug in through the [`Adapter`]
//! trait.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use itertools::Itertools;
use serde::de::DeserializeOwned;

use crate::{
    ack::{AckInnerStream, AckStream},
    errors::BroadcastError,
    ns::Namespace,
    operators::RoomParam,
    packet::Packet,
    socket::Socket,
};
use beamio::Sid;

mod session;
mod yeast;

pub use session::{Session, SessionAwareAdapter};

/// A room identifier.
pub type Room = std::borrow::Cow<'static, str>;

/// Flags modifying the behavior of a broadcast.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum BroadcastFlags {
    /// Keep the broadcast on this node, even with a cross-node adapter.
    Local,
    /// Broadcast to every matching socket except the sender.
    Broadcast,
    /// Advisory per-message compression hint, forwarded to the transport.
    Compress,
    /// Custom timeout for the ack aggregation.
    Timeout(Duration),
}

/// The recipient selection of one broadcast call.
#[derive(Clone, Debug, Default)]
pub struct BroadcastOptions {
    /// Recipients must be in at least one of these rooms. Empty means every
    /// socket of the namespace.
    pub rooms: Vec<Room>,
    /// Sockets in any of these rooms are excluded.
    pub except: Vec<Room>,
    /// Individually excluded sockets, filled in by the emitter helpers.
    pub except_sids: Vec<Sid>,
    /// The flags to apply.
    pub flags: HashSet<BroadcastFlags>,
    /// The sender, excluded when the [`BroadcastFlags::Broadcast`] flag is
    /// set.
    pub sid: Option<Sid>,
}

impl BroadcastOptions {
    pub fn new(sid: Sid) -> Self {
        Self {
            sid: Some(sid),
            ..Default::default()
        }
    }
}

/// The capability set a namespace expects from its membership store.
///
/// Every method may be called concurrently.
pub trait Adapter: std::fmt::Debug + Send + Sync + 'static {
    /// Create the adapter for a namespace. The weak ref is how sockets are
    /// looked up; the adapter never keeps direct socket references.
    fn new(ns: Weak<Namespace<Self>>) -> Self
    where
        Self: Sized;

    /// Start background machinery, called once the owning namespace exists.
    fn init(&self) {}
    /// Stop background machinery.
    fn close(&self) {}

    /// Number of server nodes seeing this namespace.
    fn server_count(&self) -> u16 {
        1
    }

    /// Add the socket to the rooms, creating them on first join.
    fn add_all(&self, sid: Sid, rooms: impl RoomParam);
    /// Remove the socket from the rooms, dropping emptied rooms.
    fn del(&self, sid: Sid, rooms: impl RoomParam);
    /// Remove the socket from every room it is in.
    fn del_all(&self, sid: Sid);

    /// Send the packet to every socket selected by `opts`. The packet is
    /// encoded once, whatever the recipient count.
    fn broadcast(&self, packet: Packet<'static>, opts: BroadcastOptions)
        -> Result<(), BroadcastError>;

    /// Same as [`broadcast`](Adapter::broadcast), collecting one ack per
    /// recipient. Recipients that disconnect before answering yield an error
    /// entry in the stream.
    fn broadcast_with_ack<V: DeserializeOwned>(
        &self,
        packet: Packet<'static>,
        opts: BroadcastOptions,
    ) -> AckStream<V>;

    /// Socket ids present in at least one of the rooms, or every socket of
    /// the namespace when `rooms` is empty.
    fn sockets(&self, rooms: impl RoomParam) -> Vec<Sid>;

    /// The rooms of one socket.
    fn socket_rooms(&self, sid: Sid) -> Vec<Room>;

    /// The sockets selected by `opts`.
    fn fetch_sockets(&self, opts: BroadcastOptions) -> Vec<Arc<Socket<Self>>>
    where
        Self: Sized;

    /// Make the selected sockets join the rooms.
    fn add_sockets(&self, opts: BroadcastOptions, rooms: impl RoomParam);
    /// Make the selected sockets leave the rooms.
    fn del_sockets(&self, opts: BroadcastOptions, rooms: impl RoomParam);
    /// Disconnect the selected sockets from the namespace.
    fn disconnect_sockets(&self, opts: BroadcastOptions) -> Result<(), BroadcastError>;

    /// Whether this adapter persists sessions for connection-state recovery.
    fn supports_recovery(&self) -> bool {
        false
    }
    /// Record the session of a disconnecting socket.
    fn persist_session(&self, _session: Session) {}
    /// Restore a session by private id, with the packets missed after
    /// `offset`. `None` when the session is unknown or expired.
    fn restore_session(&self, _pid: Sid, _offset: &str) -> Option<Session> {
        None
    }
}

/// The in-memory membership core shared by the local adapters.
///
/// Both directions of the membership relation are kept under one mutex so
/// they can never diverge: `sid ∈ rooms[r]` iff `r ∈ sids[sid]`.
#[derive(Debug)]
pub struct CoreLocalAdapter<A: Adapter> {
    maps: Mutex<MembershipMaps>,
    ns: Weak<Namespace<A>>,
}

#[derive(Debug, Default)]
struct MembershipMaps {
    rooms: HashMap<Room, HashSet<Sid>>,
    sids: HashMap<Sid, HashSet<Room>>,
}

impl<A: Adapter> CoreLocalAdapter<A> {
    pub(crate) fn new(ns: Weak<Namespace<A>>) -> Self {
        Self {
            maps: Mutex::new(MembershipMaps::default()),
            ns,
        }
    }

    pub(crate) fn add_all(&self, sid: Sid, rooms: impl RoomParam) {
        let mut maps = self.maps.lock().unwrap();
        for room in rooms.into_room_iter() {
            maps.rooms.entry(room.clone()).or_default().insert(sid);
            maps.sids.entry(sid).or_default().insert(room);
        }
    }

    pub(crate) fn del(&self, sid: Sid, rooms: impl RoomParam) {
        let mut maps = self.maps.lock().unwrap();
        for room in rooms.into_room_iter() {
            if let Some(members) = maps.rooms.get_mut(&room) {
                members.remove(&sid);
                if members.is_empty() {
                    maps.rooms.remove(&room);
                }
            }
            if let Some(rooms) = maps.sids.get_mut(&sid) {
                rooms.remove(&room);
            }
        }
    }

    pub(crate) fn del_all(&self, sid: Sid) {
        let mut maps = self.maps.lock().unwrap();
        if let Some(rooms) = maps.sids.remove(&sid) {
            for room in rooms {
                if let Some(members) = maps.rooms.get_mut(&room) {
                    members.remove(&sid);
                    if members.is_empty() {
                        maps.rooms.remove(&room);
                    }
                }
            }
        }
    }

    pub(crate) fn sockets(&self, rooms: impl RoomParam) -> Vec<Sid> {
        let rooms = rooms.into_room_iter().collect::<Vec<_>>();
        if rooms.is_empty() {
            let Some(ns) = self.ns.upgrade() else {
                return vec![];
            };
            return ns.get_sockets().into_iter().map(|s| s.id).collect();
        }
        let maps = self.maps.lock().unwrap();
        rooms
            .iter()
            .filter_map(|room| maps.rooms.get(room))
            .flatten()
            .unique()
            .copied()
            .collect()
    }

    pub(crate) fn socket_rooms(&self, sid: Sid) -> Vec<Room> {
        let maps = self.maps.lock().unwrap();
        maps.sids
            .get(&sid)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Resolve `opts` into the recipient sockets.
    pub(crate) fn apply_opts(&self, opts: &BroadcastOptions) -> Vec<Arc<Socket<A>>> {
        let Some(ns) = self.ns.upgrade() else {
            return vec![];
        };
        let maps = self.maps.lock().unwrap();
        Self::apply_opts_locked(&maps, opts, &ns)
    }

    /// Recipient enumeration, running under the membership lock held by the
    /// caller.
    fn apply_opts_locked(
        maps: &MembershipMaps,
        opts: &BroadcastOptions,
        ns: &Arc<Namespace<A>>,
    ) -> Vec<Arc<Socket<A>>> {
        let mut except = Self::except_sids_locked(maps, &opts.except);
        except.extend(&opts.except_sids);
        if opts.flags.contains(&BroadcastFlags::Broadcast) {
            if let Some(sid) = opts.sid {
                except.insert(sid);
            }
        }

        if !opts.rooms.is_empty() {
            opts.rooms
                .iter()
                .filter_map(|room| maps.rooms.get(room))
                .flatten()
                .unique()
                .filter(|sid| !except.contains(sid))
                .filter_map(|sid| ns.get_socket(*sid).ok())
                .collect()
        } else if opts.flags.contains(&BroadcastFlags::Broadcast) {
            ns.get_sockets()
                .into_iter()
                .filter(|socket| !except.contains(&socket.id))
                .collect()
        } else if let Some(socket) = opts.sid.and_then(|sid| ns.get_socket(sid).ok()) {
            vec![socket]
        } else {
            vec![]
        }
    }

    fn except_sids_locked(maps: &MembershipMaps, except: &[Room]) -> HashSet<Sid> {
        let mut except_sids = HashSet::new();
        for room in except {
            if let Some(members) = maps.rooms.get(room) {
                except_sids.extend(members);
            }
        }
        except_sids
    }

    /// Fan the packet out. Recipients are enumerated and the packet encoded
    /// exactly once under the same membership lock; sends happen after it is
    /// released.
    pub(crate) fn broadcast(
        &self,
        packet: Packet<'static>,
        opts: &BroadcastOptions,
    ) -> Result<(), BroadcastError> {
        let Some(ns) = self.ns.upgrade() else {
            return Ok(());
        };
        let (sockets, encoded) = {
            let maps = self.maps.lock().unwrap();
            let sockets = Self::apply_opts_locked(&maps, opts, &ns);
            let encoded = crate::socket::EncodedPacket::encode(packet)?;
            (sockets, encoded)
        };
        tracing::debug!("broadcasting packet to {} sockets", sockets.len());

        let errors: Vec<_> = sockets
            .into_iter()
            .filter_map(|socket| socket.send_encoded(encoded.clone()).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    /// Fan the packet out and gather one ack per recipient. The recipient
    /// count is fixed before the first send.
    pub(crate) fn broadcast_with_ack(
        &self,
        packet: Packet<'static>,
        opts: &BroadcastOptions,
        default_timeout: Duration,
    ) -> AckInnerStream {
        let timeout = opts
            .flags
            .iter()
            .find_map(|flag| match flag {
                BroadcastFlags::Timeout(duration) => Some(*duration),
                _ => None,
            })
            .unwrap_or(default_timeout);
        let sockets = self.apply_opts(opts);
        tracing::debug!("broadcasting packet to {} sockets with ack", sockets.len());
        AckInnerStream::broadcast(packet, sockets, timeout)
    }

    pub(crate) fn disconnect_sockets(
        &self,
        opts: &BroadcastOptions,
    ) -> Result<(), BroadcastError> {
        let errors: Vec<_> = self
            .apply_opts(opts)
            .into_iter()
            .filter_map(|socket| socket.disconnect().err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }
}

/// The default adapter: in-memory state, single node.
#[derive(Debug)]
pub struct LocalAdapter(CoreLocalAdapter<LocalAdapter>);

impl Adapter for LocalAdapter {
    fn new(ns: Weak<Namespace<Self>>) -> Self {
        Self(CoreLocalAdapter::new(ns))
    }

    fn add_all(&self, sid: Sid, rooms: impl RoomParam) {
        self.0.add_all(sid, rooms);
    }

    fn del(&self, sid: Sid, rooms: impl RoomParam) {
        self.0.del(sid, rooms);
    }

    fn del_all(&self, sid: Sid) {
        self.0.del_all(sid);
    }

    fn broadcast(
        &self,
        packet: Packet<'static>,
        opts: BroadcastOptions,
    ) -> Result<(), BroadcastError> {
        self.0.broadcast(packet, &opts)
    }

    fn broadcast_with_ack<V: DeserializeOwned>(
        &self,
        packet: Packet<'static>,
        opts: BroadcastOptions,
    ) -> AckStream<V> {
        let timeout = self
            .0
            .ns
            .upgrade()
            .map(|ns| ns.ack_timeout())
            .unwrap_or(Duration::from_secs(5));
        self.0.broadcast_with_ack(packet, &opts, timeout).into()
    }

    fn sockets(&self, rooms: impl RoomParam) -> Vec<Sid> {
        self.0.sockets(rooms)
    }

    fn socket_rooms(&self, sid: Sid) -> Vec<Room> {
        self.0.socket_rooms(sid)
    }

    fn fetch_sockets(&self, opts: BroadcastOptions) -> Vec<Arc<Socket<Self>>> {
        self.0.apply_opts(&opts)
    }

    fn add_sockets(&self, opts: BroadcastOptions, rooms: impl RoomParam) {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        for socket in self.0.apply_opts(&opts) {
            self.add_all(socket.id, rooms.clone());
        }
    }

    fn del_sockets(&self, opts: BroadcastOptions, rooms: impl RoomParam) {
        let rooms: Vec<Room> = rooms.into_room_iter().collect();
        for socket in self.0.apply_opts(&opts) {
            self.del(socket.id, rooms.clone());
        }
    }

    fn disconnect_sockets(&self, opts: BroadcastOptions) -> Result<(), BroadcastError> {
        self.0.disconnect_sockets(&opts)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sids<const N: usize>() -> [Sid; N] {
        std::array::from_fn(|_| Sid::new())
    }

    #[tokio::test]
    async fn add_all_keeps_maps_consistent() {
        let [sid] = sids();
        let ns = Namespace::new_dummy([sid]);
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        adapter.add_all(sid, ["room1", "room2"]);

        let maps = adapter.0.maps.lock().unwrap();
        assert_eq!(maps.rooms.len(), 2);
        assert!(maps.rooms.get("room1").unwrap().contains(&sid));
        assert!(maps.rooms.get("room2").unwrap().contains(&sid));
        assert_eq!(maps.sids.get(&sid).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn del_drops_empty_rooms() {
        let [sid] = sids();
        let ns = Namespace::new_dummy([sid]);
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        adapter.add_all(sid, ["room1", "room2"]);
        adapter.del(sid, "room1");

        let maps = adapter.0.maps.lock().unwrap();
        assert!(!maps.rooms.contains_key("room1"));
        assert!(maps.rooms.contains_key("room2"));
        assert_eq!(
            maps.sids.get(&sid).unwrap().iter().collect::<Vec<_>>(),
            ["room2"]
        );
    }

    #[tokio::test]
    async fn del_all_restores_pristine_state() {
        let [sid] = sids();
        let ns = Namespace::new_dummy([sid]);
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        adapter.add_all(sid, ["room1", "room2"]);
        adapter.del_all(sid);

        let maps = adapter.0.maps.lock().unwrap();
        assert!(maps.rooms.is_empty());
        assert!(maps.sids.is_empty());
    }

    #[tokio::test]
    async fn socket_rooms_is_direct_lookup() {
        let [s1, s2, s3] = sids();
        let ns = Namespace::new_dummy([s1, s2, s3]);
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        adapter.add_all(s1, ["room1", "room2"]);
        adapter.add_all(s2, ["room1"]);
        adapter.add_all(s3, ["room2"]);

        assert!(adapter.socket_rooms(s1).contains(&"room1".into()));
        assert!(adapter.socket_rooms(s1).contains(&"room2".into()));
        assert_eq!(adapter.socket_rooms(s2), ["room1"]);
        assert_eq!(adapter.socket_rooms(s3), ["room2"]);
    }

    #[tokio::test]
    async fn sockets_is_a_union() {
        let [s1, s2, s3] = sids();
        let ns = Namespace::new_dummy([s1, s2, s3]);
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        adapter.add_all(s1, ["room1", "room2"]);
        adapter.add_all(s2, ["room1", "room3"]);
        adapter.add_all(s3, ["room2", "room3"]);

        let sockets = adapter.sockets("room1");
        assert_eq!(sockets.len(), 2);
        assert!(sockets.contains(&s1));
        assert!(sockets.contains(&s2));

        // empty room list means every socket
        let sockets = adapter.sockets(());
        assert_eq!(sockets.len(), 3);

        // a socket in both rooms is returned once
        let sockets = adapter.sockets(["room1", "room2"]);
        assert_eq!(sockets.len(), 3);
    }

    #[tokio::test]
    async fn apply_opts_selection() {
        let [s1, s2, s3] = sids();
        let ns = Namespace::new_dummy([s1, s2, s3]);
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        adapter.add_all(s1, ["room1", "room2"]);
        adapter.add_all(s2, ["room1", "room3"]);
        adapter.add_all(s3, ["room1", "room2", "room3"]);

        // room1 minus room2 members, sender excluded
        let mut opts = BroadcastOptions::new(s3);
        opts.rooms = vec!["room1".into()];
        opts.except = vec!["room2".into()];
        opts.flags.insert(BroadcastFlags::Broadcast);
        let sockets = adapter.fetch_sockets(opts);
        assert_eq!(sockets.len(), 1);
        assert_eq!(sockets[0].id, s2);

        // broadcast to everyone but the sender
        let mut opts = BroadcastOptions::new(s3);
        opts.flags.insert(BroadcastFlags::Broadcast);
        let sockets = adapter.fetch_sockets(opts);
        assert_eq!(sockets.len(), 2);

        // explicit per-socket exclusion
        let mut opts = BroadcastOptions::new(s3);
        opts.flags.insert(BroadcastFlags::Broadcast);
        opts.except_sids = vec![s1, s2];
        let sockets = adapter.fetch_sockets(opts);
        assert!(sockets.is_empty());

        // no flag, no room: the sender itself
        let opts = BroadcastOptions::new(s3);
        let sockets = adapter.fetch_sockets(opts);
        assert_eq!(sockets.len(), 1);
        assert_eq!(sockets[0].id, s3);

        let opts = BroadcastOptions::new(Sid::new());
        let sockets = adapter.fetch_sockets(opts);
        assert!(sockets.is_empty());
    }

    #[tokio::test]
    async fn add_and_del_sockets_through_opts() {
        let [sid] = sids();
        let ns = Namespace::new_dummy([sid]);
        let adapter = LocalAdapter::new(Arc::downgrade(&ns));
        adapter.add_all(sid, ["room1"]);

        let mut opts = BroadcastOptions::new(sid);
        opts.rooms = vec!["room1".into()];
        adapter.add_sockets(opts, "room2");
        assert!(adapter.socket_rooms(sid).contains(&"room2".into()));

        let mut opts = BroadcastOptions::new(sid);
        opts.rooms = vec!["room1".into()];
        adapter.del_sockets(opts, "room2");
        assert!(!adapter.socket_rooms(sid).contains(&"room2".into()));
    }
}
