//! Media stream descriptors
//!
//! Streams are opaque to the protocol; only their identity and declared role
//! matter. The role is carried explicitly so receivers never have to guess
//! which stream is a screen share from its resolution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Stream identity used for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random stream identity
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRole {
    /// Camera and microphone
    Camera,
    /// Screen share
    Screen,
    /// Not declared by the sender
    Unknown,
}

/// Kind of a single track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// A media stream handle
///
/// Cheap to clone; clones share the same track list. The session layer only
/// passes these around and never stops or mutates a caller's stream.
#[derive(Debug, Clone)]
pub struct MediaStream {
    id: StreamId,
    role: StreamRole,
    tracks: Arc<[TrackKind]>,
}

impl MediaStream {
    /// Create a stream descriptor
    pub fn new(id: StreamId, role: StreamRole, tracks: &[TrackKind]) -> Self {
        Self {
            id,
            role,
            tracks: Arc::from(tracks),
        }
    }

    /// Camera stream with one audio and one video track
    pub fn camera() -> Self {
        Self::new(
            StreamId::random(),
            StreamRole::Camera,
            &[TrackKind::Audio, TrackKind::Video],
        )
    }

    /// Screen share stream with a single video track
    pub fn screen() -> Self {
        Self::new(StreamId::random(), StreamRole::Screen, &[TrackKind::Video])
    }

    /// Stream identity
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Declared role
    pub fn role(&self) -> StreamRole {
        self.role
    }

    /// Track kinds
    pub fn tracks(&self) -> &[TrackKind] {
        &self.tracks
    }

    /// Whether the stream carries any video
    pub fn has_video(&self) -> bool {
        self.tracks.contains(&TrackKind::Video)
    }

    /// Whether the stream carries any audio
    pub fn has_audio(&self) -> bool {
        self.tracks.contains(&TrackKind::Audio)
    }
}

/// Streams are equal when they share an identity
impl PartialEq for MediaStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MediaStream {}
