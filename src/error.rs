//! Error types
//!
//! A single error enum shared by the transport contract, the in-memory hub
//! and the wire codecs. The public coordinator/session APIs never return
//! these to callers; they surface failures through their snapshots instead.

use crate::transport::PeerId;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rendezvous and session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying rendezvous transport failed or is unreachable
    #[error("transport error: {0}")]
    Transport(String),

    /// This client is already a member of the named room
    #[error("room already joined: {0}")]
    AlreadyJoined(String),

    /// The room membership has been left
    #[error("room closed: {0}")]
    RoomClosed(String),

    /// Unicast target is not a member of the room
    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    /// Payload could not be encoded or decoded
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error is an expected race (peer gone, room left) rather
    /// than a real failure. Used to pick the log level.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::PeerNotFound(_) | Error::RoomClosed(_))
    }
}
