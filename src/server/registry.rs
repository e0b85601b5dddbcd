//! Registry of live mock peer conversations.
//!
//! Each accepted connection gets a slab slot for as long as its
//! conversation runs, so the server can log how many peers are active,
//! which step each one has reached and how long it has been connected.

use chrono::{DateTime, Utc};
use slab::Slab;
use std::net::SocketAddr;

/// Current state of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Executing the step at this index.
    Playing { step: usize },
}

/// A single accepted connection.
#[derive(Debug, Clone)]
pub struct PeerConnection {
    /// Monotonic connection id, also used to name the report file.
    pub id: u64,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub state: ConnState,
}

impl PeerConnection {
    pub fn new(id: u64, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            connected_at: Utc::now(),
            state: ConnState::Playing { step: 0 },
        }
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

/// Slab-backed set of live connections with a fixed capacity.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: Slab<PeerConnection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a connection.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: PeerConnection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerConnection> {
        self.connections.iter().map(|(_, conn)| conn)
    }

    /// Record progress of a conversation.
    pub fn set_state(&mut self, key: usize, state: ConnState) {
        if let Some(conn) = self.connections.get_mut(key) {
            conn.state = state;
        }
    }

    pub fn remove(&mut self, key: usize) -> Option<PeerConnection> {
        self.connections.try_remove(key)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_connections
    }
}
