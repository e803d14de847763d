//! Session connection state
//!
//! Tracks one session channel from join to teardown. Remote peer presence
//! and remote streams are both liveness signals; whichever arrives first
//! moves the session to `Connected`.

use crate::matchmaking::SessionChannelId;
use crate::transport::{MediaStream, PeerId, StreamId};

/// Session connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session channel joined
    Idle,
    /// Joined (or joining), remote peer not seen yet
    Connecting,
    /// Remote peer present
    Connected,
    /// Remote peer left, or the join failed
    Disconnected,
}

/// Observable session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current connection state
    pub connection_state: ConnectionState,

    /// Streams received from the remote peer, in arrival order, unique by id
    pub remote_streams: Vec<MediaStream>,

    /// Remote peer, once seen
    pub remote_peer_id: Option<PeerId>,

    /// Session channel, while joined
    pub session: Option<SessionChannelId>,

    /// Whether the local side initiated the match
    pub is_initiator: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Idle,
            remote_streams: Vec::new(),
            remote_peer_id: None,
            session: None,
            is_initiator: false,
        }
    }
}

impl SessionSnapshot {
    /// Snapshot for a session that is being joined
    pub fn connecting(session: SessionChannelId, is_initiator: bool) -> Self {
        Self {
            connection_state: ConnectionState::Connecting,
            session: Some(session),
            is_initiator,
            ..Default::default()
        }
    }

    /// Remote peer seen on the channel
    pub fn on_peer_joined(&mut self, peer: &PeerId) -> bool {
        let changed = self.remote_peer_id.as_ref() != Some(peer)
            || self.connection_state != ConnectionState::Connected;

        self.remote_peer_id = Some(peer.clone());
        self.connection_state = ConnectionState::Connected;
        changed
    }

    /// A peer left the channel; only the tracked remote peer matters
    pub fn on_peer_left(&mut self, peer: &PeerId) -> bool {
        if self.remote_peer_id.as_ref() != Some(peer) {
            return false;
        }
        self.connection_state = ConnectionState::Disconnected;
        self.remote_streams.clear();
        true
    }

    /// Remote stream received; duplicates by stream id are ignored
    pub fn on_remote_stream(&mut self, stream: MediaStream, from: &PeerId) -> bool {
        let mut changed = self.on_peer_joined(from);

        if !self.remote_streams.iter().any(|s| s.id() == stream.id()) {
            self.remote_streams.push(stream);
            changed = true;
        }
        changed
    }

    /// Remote peer detached a stream
    pub fn on_stream_removed(&mut self, stream_id: &StreamId) -> bool {
        let before = self.remote_streams.len();
        self.remote_streams.retain(|s| s.id() != stream_id);
        self.remote_streams.len() != before
    }

    /// Joining the channel failed
    pub fn fail(&mut self) {
        self.connection_state = ConnectionState::Disconnected;
        self.remote_streams.clear();
    }

    /// Check if the remote peer is connected
    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }
}
