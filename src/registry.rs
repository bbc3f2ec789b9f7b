use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use warp::ws::Message;

pub type OutboundSender = mpsc::UnboundedSender<Message>;

struct ConnectionRecord {
    user_id: String,
    rooms: HashSet<i64>,
    sender: OutboundSender,
}

// Authoritative map of live connections. One coarse lock guards the whole
// table; every accessor takes the lock for the duration of the mutation
// and nothing here performs I/O, so `members_of` reflects every join and
// leave completed before it was called.
#[derive(Default)]
pub struct Registry {
    connections: RwLock<HashMap<String, ConnectionRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    // Creates a record with an empty room set and returns its connection id.
    pub async fn register(&self, user_id: String, sender: OutboundSender) -> String {
        let connection_id = Uuid::new_v4().to_string();
        let mut connections = self.connections.write().await;
        connections.insert(
            connection_id.clone(),
            ConnectionRecord {
                user_id,
                rooms: HashSet::new(),
                sender,
            },
        );
        connection_id
    }

    // Removes the record and with it every room membership. Tolerates
    // double-close: unregistering an unknown id is a no-op.
    pub async fn unregister(&self, connection_id: &str) {
        let mut connections = self.connections.write().await;
        connections.remove(connection_id);
    }

    pub async fn user_of(&self, connection_id: &str) -> Option<String> {
        let connections = self.connections.read().await;
        connections.get(connection_id).map(|r| r.user_id.clone())
    }

    // Idempotent: joining a room twice leaves the membership unchanged.
    // Returns false if the connection is no longer registered.
    pub async fn join(&self, connection_id: &str, room_id: i64) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(connection_id) {
            Some(record) => {
                record.rooms.insert(room_id);
                true
            }
            None => false,
        }
    }

    // Idempotent: leaving a room the connection is not in is a no-op.
    pub async fn leave(&self, connection_id: &str, room_id: i64) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get_mut(connection_id) {
            Some(record) => {
                record.rooms.remove(&room_id);
                true
            }
            None => false,
        }
    }

    pub async fn is_member(&self, connection_id: &str, room_id: i64) -> bool {
        let connections = self.connections.read().await;
        connections
            .get(connection_id)
            .is_some_and(|r| r.rooms.contains(&room_id))
    }

    // Snapshot of every live member of a room, taken under the read lock.
    // Callers deliver on the cloned senders after the lock is released.
    pub async fn members_of(&self, room_id: i64) -> Vec<(String, OutboundSender)> {
        let connections = self.connections.read().await;
        connections
            .iter()
            .filter(|(_, record)| record.rooms.contains(&room_id))
            .map(|(id, record)| (id.clone(), record.sender.clone()))
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}
