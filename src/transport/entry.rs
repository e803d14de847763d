//! Room entry and member types
//!
//! Per-room state stored in the in-memory hub.

use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::media::{MediaStream, StreamId};
use super::{PeerId, RoomEvent};

/// A single member of a room
pub(super) struct Member {
    /// Event queue sender; dropping it closes the member's receiver
    tx: mpsc::Sender<RoomEvent>,

    /// Streams attached for every peer (replayed to late joiners)
    pub(super) streams: Vec<MediaStream>,
}

impl Member {
    pub(super) fn new(tx: mpsc::Sender<RoomEvent>) -> Self {
        Self {
            tx,
            streams: Vec::new(),
        }
    }

    /// Queue an event for this member
    ///
    /// Events for a full or closed queue are dropped; returns whether the
    /// event was queued.
    pub(super) fn deliver(&self, peer: &PeerId, event: RoomEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(peer = %peer, "Event queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Attach a broadcast stream; returns false if already attached
    pub(super) fn attach(&mut self, stream: &MediaStream) -> bool {
        if self.streams.iter().any(|s| s.id() == stream.id()) {
            return false;
        }
        self.streams.push(stream.clone());
        true
    }

    /// Detach a stream; returns whether it was attached
    pub(super) fn detach(&mut self, stream_id: &StreamId) -> bool {
        let before = self.streams.len();
        self.streams.retain(|s| s.id() != stream_id);
        self.streams.len() != before
    }
}

/// Entry for a single room in the hub
///
/// Members are kept in id order so event fan-out is deterministic.
pub(super) struct RoomEntry {
    pub(super) members: BTreeMap<PeerId, Member>,

    /// When the room was created
    pub(super) created_at: Instant,
}

impl RoomEntry {
    pub(super) fn new() -> Self {
        Self {
            members: BTreeMap::new(),
            created_at: Instant::now(),
        }
    }

    /// Deliver an event to every member except `except`
    pub(super) fn fan_out(&self, except: &PeerId, event: &RoomEvent) -> usize {
        self.members
            .iter()
            .filter(|(id, _)| *id != except)
            .filter(|(id, member)| member.deliver(id, event.clone()))
            .count()
    }

    /// Deliver an event to a single member
    pub(super) fn deliver_to(&self, target: &PeerId, event: RoomEvent) -> Option<bool> {
        self.members
            .get(target)
            .map(|member| member.deliver(target, event))
    }

    pub(super) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Snapshot of a room for inspection
#[derive(Debug, Clone)]
pub struct RoomStats {
    /// Current members in id order
    pub members: Vec<PeerId>,
    /// Number of broadcast streams attached across all members
    pub stream_count: usize,
    /// Age of the room
    pub age: std::time::Duration,
}

impl RoomStats {
    pub(super) fn from_entry(entry: &RoomEntry) -> Self {
        Self {
            members: entry.members.keys().cloned().collect(),
            stream_count: entry.members.values().map(|m| m.streams.len()).sum(),
            age: entry.created_at.elapsed(),
        }
    }

    /// Number of members
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_attach_detach() {
        let (tx, _rx) = mpsc::channel(4);
        let mut member = Member::new(tx);
        let stream = MediaStream::camera();

        assert!(member.attach(&stream));
        assert!(!member.attach(&stream));
        assert_eq!(member.streams.len(), 1);

        assert!(member.detach(stream.id()));
        assert!(!member.detach(stream.id()));
        assert!(member.streams.is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_skips_sender() {
        let mut entry = RoomEntry::new();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        entry.members.insert(PeerId::from("a"), Member::new(tx_a));
        entry.members.insert(PeerId::from("b"), Member::new(tx_b));

        let delivered = entry.fan_out(&PeerId::from("a"), &RoomEvent::PeerLeft(PeerId::from("x")));
        assert_eq!(delivered, 1);

        assert!(matches!(rx_b.recv().await, Some(RoomEvent::PeerLeft(_))));
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let member = Member::new(tx);
        let peer = PeerId::from("a");

        assert!(member.deliver(&peer, RoomEvent::PeerJoined(PeerId::from("b"))));
        assert!(!member.deliver(&peer, RoomEvent::PeerJoined(PeerId::from("c"))));
    }

    #[test]
    fn test_deliver_to_missing() {
        let entry = RoomEntry::new();
        assert!(entry
            .deliver_to(&PeerId::from("nobody"), RoomEvent::PeerLeft(PeerId::from("x")))
            .is_none());
        assert!(entry.is_empty());
    }
}
