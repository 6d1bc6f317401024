//! Per-connection protocol state and the connection table.
//!
//! A connection starts out speaking HTTP and switches to WebSocket framing
//! once, after a successful upgrade. The two parser states are variants of
//! one enum so only the active one can be reached.

use crate::config::Limits;
use crate::protocols::http::RequestParser;
use crate::protocols::websocket::FrameParser;
use slab::Slab;

/// Connection identifier. Doubles as the poll token.
pub type ConnectionId = usize;

/// Which wire format the connection is currently speaking.
#[derive(Debug)]
pub enum Mode {
    /// Waiting for a complete HTTP upgrade request.
    AwaitingHttpUpgrade(RequestParser),
    /// Upgrade done; bytes are WebSocket frames.
    WebSocketActive(FrameParser),
}

/// Protocol state for one connection.
#[derive(Debug)]
pub struct ConnectionState {
    pub(crate) mode: Mode,
    limits: Limits,
}

impl ConnectionState {
    /// Fresh state for a newly accepted connection.
    pub fn new(limits: Limits) -> Self {
        Self {
            mode: Mode::AwaitingHttpUpgrade(RequestParser::new(limits.max_request_size)),
            limits,
        }
    }

    #[cfg(test)]
    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self.mode, Mode::WebSocketActive(_))
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Switch to WebSocket framing with `frames` as the decoder.
    ///
    /// The switch happens once; a connection already speaking WebSocket keeps
    /// its current decoder.
    pub(crate) fn switch_to_websocket(&mut self, frames: FrameParser) {
        if !self.is_websocket() {
            self.mode = Mode::WebSocketActive(frames);
        }
    }
}

/// Registry of live connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove. Keys are only reused after the
/// previous holder has been removed.
pub struct ConnectionTable<C> {
    connections: Slab<C>,
    max_connections: usize,
}

impl<C> ConnectionTable<C> {
    /// Create a table with the specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(4096)),
            max_connections,
        }
    }

    /// Insert a new connection.
    ///
    /// Returns `None` if the table is at capacity.
    pub fn insert(&mut self, conn: C) -> Option<ConnectionId> {
        if self.is_full() {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    #[cfg(test)]
    pub fn get(&self, id: ConnectionId) -> Option<&C> {
        self.connections.get(id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut C> {
        self.connections.get_mut(id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<C> {
        self.connections.try_remove(id)
    }

    #[cfg(test)]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    /// Identifiers of all live connections.
    #[cfg(test)]
    pub fn ids(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.connections.iter().map(|(id, _)| id)
    }
}
