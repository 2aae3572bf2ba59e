use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use super::{RoomPath, events::Event};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// One live participant connection. Dropping it closes the event channel,
/// which ends the owning websocket task's send loop.
struct Connection {
    id: u64,
    tx: UnboundedSender<Event>,
    remote_ip: Option<IpAddr>,
}

/// Per-room registry of live connections, keyed by participant name. At most
/// one connection per name; a rejoin under the same name replaces the old
/// connection, whose task then observes its channel closing and exits.
pub struct Hub {
    room: RoomPath,
    conns: RwLock<HashMap<String, Connection>>,
}

impl Hub {
    fn new(room: RoomPath) -> Self {
        Self {
            room,
            conns: RwLock::new(HashMap::new()),
        }
    }

    pub fn room(&self) -> &RoomPath {
        &self.room
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Delivers `event` to every joined connection not named in `except`.
    /// A failed send never aborts the loop; the unreachable connections are
    /// dropped from the hub afterwards and their names returned.
    pub fn broadcast(&self, event: &Event, except: &[&str]) -> Vec<String> {
        let mut dead = Vec::new();
        {
            let conns = self.read();
            for (name, conn) in conns.iter() {
                if except.contains(&name.as_str()) {
                    continue;
                }
                if conn.tx.send(event.clone()).is_err() {
                    dead.push(name.clone());
                }
            }
        }

        if !dead.is_empty() {
            let mut conns = self.write();
            for name in &dead {
                if conns.get(name).is_some_and(|conn| conn.tx.is_closed()) {
                    conns.remove(name);
                }
            }
        }
        dead
    }

    /// Sends to one participant, but only while `conn_id` still owns the
    /// name. Keeps a stale task from reaching whoever replaced it.
    pub fn send_to(&self, name: &str, conn_id: u64, event: Event) -> bool {
        let conns = self.read();
        match conns.get(name) {
            Some(conn) if conn.id == conn_id => conn.tx.send(event).is_ok(),
            _ => false,
        }
    }

    pub fn remote_ip(&self, name: &str) -> Option<IpAddr> {
        self.read().get(name).and_then(|conn| conn.remote_ip)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Connection>> {
        self.conns.read().expect("hub lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Connection>> {
        self.conns.write().expect("hub lock poisoned")
    }
}

/// Process-wide room-name → hub map. Hubs are created on first join and torn
/// down when their last connection leaves; get-or-create runs under the
/// map's shard lock so concurrent first joins agree on one hub instance.
#[derive(Default)]
pub struct HubRegistry {
    hubs: DashMap<String, Arc<Hub>>,
}

impl HubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room: &RoomPath) -> Option<Arc<Hub>> {
        self.hubs.get(room.as_str()).map(|hub| hub.clone())
    }

    /// Fetch-or-create the room's hub and insert the connection. Returns the
    /// hub and the connection id used to guard the later leave. The insert
    /// happens while the registry entry is held, so an in-flight empty-hub
    /// teardown cannot strand this connection in a removed hub.
    pub fn join(
        &self,
        room: &RoomPath,
        user: &str,
        tx: UnboundedSender<Event>,
        remote_ip: Option<IpAddr>,
    ) -> (Arc<Hub>, u64) {
        let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        let entry = self
            .hubs
            .entry(room.to_string())
            .or_insert_with(|| Arc::new(Hub::new(room.clone())));
        let hub = entry.value().clone();
        // Replaces any prior connection under this name; dropping it closes
        // the evicted task's channel.
        hub.write().insert(user.to_owned(), Connection { id, tx, remote_ip });
        drop(entry);
        (hub, id)
    }

    /// Removes the connection if `conn_id` still owns the name, then drops
    /// the hub itself once empty.
    pub fn leave(&self, room: &RoomPath, user: &str, conn_id: u64) {
        let Some(hub) = self.get(room) else {
            return;
        };
        {
            let mut conns = hub.write();
            match conns.get(user) {
                Some(conn) if conn.id == conn_id => {
                    conns.remove(user);
                }
                // Evicted by a rejoin; the name now belongs to someone else.
                _ => return,
            }
        }
        self.hubs.remove_if(room.as_str(), |_, hub| hub.is_empty());
    }

    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use super::*;
    use crate::rooms::events::{Event, Message};

    fn room() -> RoomPath {
        RoomPath::parse("general").unwrap()
    }

    fn event(text: &str) -> Event {
        Event::Message(Message {
            user_name: "alice".to_owned(),
            text: text.to_owned(),
            timestamp: 1,
        })
    }

    fn join(
        registry: &HubRegistry,
        user: &str,
    ) -> (Arc<Hub>, u64, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (hub, id) = registry.join(&room(), user, tx, None);
        (hub, id, rx)
    }

    #[test]
    fn broadcast_skips_excepted_participants() {
        let registry = HubRegistry::new();
        let (hub, _, mut rx_a) = join(&registry, "a");
        let (_, _, mut rx_b) = join(&registry, "b");
        let (_, _, mut rx_c) = join(&registry, "c");

        let dropped = hub.broadcast(&event("hello"), &["b"]);
        assert!(dropped.is_empty());
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn broadcast_drops_dead_connections_and_reaches_the_rest() {
        let registry = HubRegistry::new();
        let (hub, _, rx_a) = join(&registry, "a");
        let (_, _, mut rx_b) = join(&registry, "b");

        drop(rx_a);
        let dropped = hub.broadcast(&event("hello"), &[]);
        assert_eq!(dropped, ["a"]);
        assert!(rx_b.try_recv().is_ok());
        assert_eq!(hub.len(), 1);
    }

    #[test]
    fn rejoin_evicts_the_previous_connection() {
        let registry = HubRegistry::new();
        let (hub, old_id, mut old_rx) = join(&registry, "alice");
        let (_, new_id, mut new_rx) = join(&registry, "alice");

        assert_eq!(hub.len(), 1);
        // The evicted side observes its channel closing.
        assert!(matches!(
            old_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        hub.broadcast(&event("hello"), &[]);
        assert!(new_rx.try_recv().is_ok());

        // The stale task's leave must not remove the replacement.
        registry.leave(&room(), "alice", old_id);
        assert_eq!(hub.len(), 1);
        registry.leave(&room(), "alice", new_id);
        assert!(registry.is_empty());
    }

    #[test]
    fn hub_is_torn_down_with_its_last_connection() {
        let registry = HubRegistry::new();
        let (_, id_a, _rx_a) = join(&registry, "a");
        let (_, id_b, _rx_b) = join(&registry, "b");
        assert_eq!(registry.len(), 1);

        registry.leave(&room(), "a", id_a);
        assert_eq!(registry.len(), 1);
        registry.leave(&room(), "b", id_b);
        assert!(registry.is_empty());
        assert!(registry.get(&room()).is_none());
    }

    #[test]
    fn send_to_respects_connection_identity() {
        let registry = HubRegistry::new();
        let (hub, old_id, _old_rx) = join(&registry, "alice");
        let (_, new_id, mut new_rx) = join(&registry, "alice");

        assert!(!hub.send_to("alice", old_id, event("stale")));
        assert!(hub.send_to("alice", new_id, event("fresh")));
        assert_eq!(
            new_rx.try_recv().unwrap(),
            event("fresh")
        );
    }
}
