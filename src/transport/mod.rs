//! Rendezvous transport contract
//!
//! The matchmaking and session layers never talk to a network directly. They
//! consume this small pub/sub contract: join a named room, observe peers
//! arriving and leaving, exchange small named action payloads and attach
//! media streams.
//!
//! # Architecture
//!
//! ```text
//!     Transport::join("devgle-lobby-v3")
//!              │
//!              ├──► RoomHandle   send / add_stream / remove_stream / leave
//!              │
//!              └──► RoomEvents   PeerJoined / PeerLeft / Action / PeerStream
//!                     (mpsc)
//! ```
//!
//! Every membership is exclusively owned by the component that joined it.
//! Leaving closes the event receiver, which stops all further processing for
//! that membership.
//!
//! [`memory::MemoryHub`] is an in-process implementation of the contract.

pub mod action;
pub mod entry;
pub mod media;
pub mod memory;

use std::future::Future;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

pub use action::Action;
pub use entry::RoomStats;
pub use media::{MediaStream, StreamId, StreamRole, TrackKind};
pub use memory::{MemoryHub, MemoryRoom, MemoryTransport};

/// Transport-assigned peer identifier
///
/// Ordered lexically; the matchmaking tie-break relies on this order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `len` characters, used in channel names and log output
    pub fn prefix(&self, len: usize) -> &str {
        match self.0.char_indices().nth(len) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a room (app namespace + room name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    /// Application namespace
    pub app: String,
    /// Room name
    pub name: String,
}

impl RoomKey {
    /// Create a new room key
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app, self.name)
    }
}

/// Events delivered to a room member
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// A peer is present in the room (fired for existing members on join too)
    PeerJoined(PeerId),

    /// A peer left the room
    PeerLeft(PeerId),

    /// Named action payload from a peer
    Action {
        /// Action name
        name: String,
        /// Encoded payload
        payload: Bytes,
        /// Sender
        from: PeerId,
    },

    /// A peer attached a media stream
    PeerStream {
        /// The stream
        stream: MediaStream,
        /// Sender
        from: PeerId,
    },

    /// A peer detached a media stream
    StreamRemoved {
        /// Identity of the removed stream
        stream_id: StreamId,
        /// Sender
        from: PeerId,
    },
}

/// Receiver half of a membership's event queue
pub type RoomEvents = mpsc::Receiver<RoomEvent>;

/// A rendezvous transport able to join named rooms
pub trait Transport: Send + Sync + 'static {
    /// Membership handle type
    type Room: RoomHandle;

    /// Local transport id, stable across all rooms joined by this client
    fn self_id(&self) -> &PeerId;

    /// Join a room, returning the membership and its event queue
    fn join(&self, room: &str) -> impl Future<Output = Result<(Self::Room, RoomEvents)>> + Send;
}

/// Membership in a joined room
pub trait RoomHandle: Send + Sync + 'static {
    /// Room name
    fn name(&self) -> &str;

    /// Local transport id within this room
    fn self_id(&self) -> &PeerId;

    /// Send a named action payload to one peer, or to every peer when `target` is `None`
    fn send(
        &self,
        action: &str,
        payload: Bytes,
        target: Option<&PeerId>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Attach a stream for one peer, or for every current and future peer when `target` is `None`
    fn add_stream(
        &self,
        stream: &MediaStream,
        target: Option<&PeerId>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Detach a previously attached stream
    fn remove_stream(&self, stream_id: &StreamId) -> impl Future<Output = Result<()>> + Send;

    /// Leave the room. Idempotent.
    fn leave(&self) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_order_is_lexical() {
        assert!(PeerId::from("aaa") < PeerId::from("bbb"));
        assert!(PeerId::from("a1") < PeerId::from("a2"));
        assert!(PeerId::from("Z") < PeerId::from("a"));
        assert!(PeerId::from("10") < PeerId::from("9"));
    }

    #[test]
    fn test_peer_id_prefix() {
        let id = PeerId::from("abcdefghij");
        assert_eq!(id.prefix(6), "abcdef");
        assert_eq!(PeerId::from("abc").prefix(6), "abc");
        assert_eq!(PeerId::from("ééééééé").prefix(2), "éé");
    }

    #[test]
    fn test_random_peer_ids_differ() {
        assert_ne!(PeerId::random(), PeerId::random());
    }

    #[test]
    fn test_room_key_display() {
        let key = RoomKey::new("devgle", "devgle-lobby-v3");
        assert_eq!(key.to_string(), "devgle/devgle-lobby-v3");
    }
}
