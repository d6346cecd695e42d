use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::ServerMessage;

pub type ConnectionId = Uuid;

/// Connection table for live sockets, keyed by room.
///
/// Owned by `AppState` and created at server startup. The participant rows
/// in the database are the source of truth for room membership; this table
/// only knows which sockets are currently open, so broadcasts reach exactly
/// the connections that can still receive them.
pub struct ConnectionRegistry {
    sessions: RwLock<HashMap<String, HashMap<ConnectionId, UnboundedSender<ServerMessage>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(
        &self,
        room_id: &str,
        sender: UnboundedSender<ServerMessage>,
    ) -> ConnectionId {
        let conn_id = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id, sender);
        conn_id
    }

    pub async fn unregister(&self, room_id: &str, conn_id: ConnectionId) {
        let mut sessions = self.sessions.write().await;
        if let Some(room) = sessions.get_mut(room_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                sessions.remove(room_id);
            }
        }
    }

    /// Best-effort fan-out to every live connection in the room. Sends to
    /// connections whose receiver is already gone are dropped silently;
    /// returns how many sends went through.
    pub async fn broadcast(&self, room_id: &str, message: ServerMessage) -> usize {
        let sessions = self.sessions.read().await;
        let Some(room) = sessions.get(room_id) else {
            return 0;
        };
        room.values()
            .filter(|sender| sender.send(message.clone()).is_ok())
            .count()
    }

    /// Live socket count, distinct from the persisted participant count.
    pub async fn connections_in_room(&self, room_id: &str) -> usize {
        let sessions = self.sessions.read().await;
        sessions.get(room_id).map(|room| room.len()).unwrap_or(0)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
