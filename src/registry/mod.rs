//! Connection registry: live connections, player bindings, match fan-out.
//!
//! The registry owns the maps that disconnects, subscriptions and
//! broadcasts mutate concurrently from unrelated tasks. Each connection
//! holds one unbounded outbound channel; because every broadcast for a
//! given match is issued from that match's single session task, pushing
//! onto the per-connection FIFO preserves broadcast order per recipient.

use std::collections::HashSet;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::ws::protocol::ServerMsg;

/// Outbound channel for one connection; drained by its writer task
pub type ConnectionSender = mpsc::UnboundedSender<ServerMsg>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("connection is already bound to a player")]
    AlreadyRegistered,
}

struct Connection {
    sender: ConnectionSender,
    player_id: Option<Uuid>,
    matches: HashSet<Uuid>,
}

/// Registry of all live client connections
pub struct ConnectionRegistry {
    connections: DashMap<Uuid, Connection>,
    /// player id -> connection ids (normally one)
    players: DashMap<Uuid, Vec<Uuid>>,
    /// match id -> subscribed connection ids, in subscribe order
    subscriptions: DashMap<Uuid, Vec<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            players: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    /// Track a newly accepted connection (not yet bound to a player)
    pub fn insert(&self, connection_id: Uuid, sender: ConnectionSender) {
        self.connections.insert(
            connection_id,
            Connection {
                sender,
                player_id: None,
                matches: HashSet::new(),
            },
        );
    }

    /// Bind a connection to an authenticated player
    pub fn register(&self, connection_id: Uuid, player_id: Uuid) -> Result<(), RegistryError> {
        {
            let mut conn = match self.connections.get_mut(&connection_id) {
                Some(conn) => conn,
                // Peer already gone; nothing to bind
                None => return Ok(()),
            };
            if conn.player_id.is_some() {
                return Err(RegistryError::AlreadyRegistered);
            }
            conn.player_id = Some(player_id);
        }

        self.players
            .entry(player_id)
            .or_default()
            .push(connection_id);
        Ok(())
    }

    /// Subscribe a connection to a match. Idempotent.
    pub fn subscribe(&self, connection_id: Uuid, match_id: Uuid) {
        let newly_added = match self.connections.get_mut(&connection_id) {
            Some(mut conn) => conn.matches.insert(match_id),
            None => return,
        };
        if !newly_added {
            return; // already subscribed
        }

        let mut subscribers = self.subscriptions.entry(match_id).or_default();
        if !subscribers.contains(&connection_id) {
            subscribers.push(connection_id);
        }
    }

    /// Unsubscribe a connection from a match. No-op for non-members.
    pub fn unsubscribe(&self, connection_id: Uuid, match_id: Uuid) {
        if let Some(mut conn) = self.connections.get_mut(&connection_id) {
            conn.matches.remove(&match_id);
        }
        if let Some(mut subscribers) = self.subscriptions.get_mut(&match_id) {
            subscribers.retain(|id| *id != connection_id);
        }
    }

    /// Best-effort send; silently dropped when the connection is gone
    pub fn send_to_connection(&self, connection_id: Uuid, message: ServerMsg) {
        if let Some(conn) = self.connections.get(&connection_id) {
            let _ = conn.sender.send(message);
        }
    }

    /// Send to every connection subscribed to a match, in subscribe order
    pub fn broadcast_to_match(&self, match_id: Uuid, message: &ServerMsg) {
        let subscribers: Vec<Uuid> = match self.subscriptions.get(&match_id) {
            Some(subscribers) => subscribers.clone(),
            None => return,
        };
        for connection_id in subscribers {
            self.send_to_connection(connection_id, message.clone());
        }
    }

    /// Send to the player's current connection(s); dropped when offline
    pub fn send_to_player(&self, player_id: Uuid, message: ServerMsg) {
        let connection_ids: Vec<Uuid> = match self.players.get(&player_id) {
            Some(ids) => ids.clone(),
            None => return,
        };
        for connection_id in connection_ids {
            self.send_to_connection(connection_id, message.clone());
        }
    }

    /// The player a connection is bound to, if any
    pub fn player_of(&self, connection_id: Uuid) -> Option<Uuid> {
        self.connections
            .get(&connection_id)
            .and_then(|conn| conn.player_id)
    }

    /// Remove a connection: drop all its subscriptions and release the
    /// player binding. The single `DashMap::remove` makes the cleanup run
    /// exactly once even when disconnect races with itself or a broadcast.
    pub fn remove(&self, connection_id: Uuid) {
        let (_, conn) = match self.connections.remove(&connection_id) {
            Some(entry) => entry,
            None => return, // already removed
        };

        for match_id in &conn.matches {
            if let Some(mut subscribers) = self.subscriptions.get_mut(match_id) {
                subscribers.retain(|id| *id != connection_id);
            }
        }

        if let Some(player_id) = conn.player_id {
            let drained = if let Some(mut ids) = self.players.get_mut(&player_id) {
                ids.retain(|id| *id != connection_id);
                ids.is_empty()
            } else {
                false
            };
            if drained {
                self.players.remove_if(&player_id, |_, ids| ids.is_empty());
            }
        }

        debug!(connection_id = %connection_id, "connection removed from registry");
    }

    /// Drop every subscription for a match (called at match termination)
    pub fn release_match(&self, match_id: Uuid) {
        if let Some((_, subscribers)) = self.subscriptions.remove(&match_id) {
            for connection_id in subscribers {
                if let Some(mut conn) = self.connections.get_mut(&connection_id) {
                    conn.matches.remove(&match_id);
                }
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
