//! In-process rendezvous hub
//!
//! A shared hub that implements the transport contract without a network.
//! Each client gets a [`MemoryTransport`] with its own transport id; rooms
//! are keyed by the client's app id so unrelated deployments never collide.
//!
//! ```text
//!                        Arc<MemoryHub>
//!                 ┌─────────────────────────┐
//!                 │ rooms: HashMap<RoomKey, │
//!                 │   RoomEntry {           │
//!                 │     members: id → tx,   │
//!                 │     streams             │
//!                 │   }                     │
//!                 │ >                       │
//!                 └───────────┬─────────────┘
//!         ┌───────────────────┼───────────────────┐
//!         ▼                   ▼                   ▼
//!   MemoryTransport     MemoryTransport     MemoryTransport
//!     ("aaa")             ("bbb")             ("ccc")
//! ```
//!
//! Join semantics match what the protocol expects from a real transport: a
//! joiner sees a `PeerJoined` for every existing member followed by the
//! streams those members attached, and existing members see a `PeerJoined`
//! for the joiner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};

use crate::config::RendezvousConfig;
use crate::error::{Error, Result};

use super::entry::{Member, RoomEntry, RoomStats};
use super::media::{MediaStream, StreamId};
use super::{PeerId, RoomEvent, RoomEvents, RoomHandle, RoomKey, Transport};

/// Shared in-memory rendezvous
pub struct MemoryHub {
    /// Map of room key to room entry
    rooms: RwLock<HashMap<RoomKey, RoomEntry>>,

    /// When false every join fails, simulating an unreachable relay
    available: AtomicBool,
}

impl MemoryHub {
    /// Create a new hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        })
    }

    /// Create a client with a fixed transport id
    pub fn client(
        self: &Arc<Self>,
        config: &RendezvousConfig,
        self_id: impl Into<PeerId>,
    ) -> MemoryTransport {
        MemoryTransport {
            hub: Arc::clone(self),
            self_id: self_id.into(),
            app_id: config.app_id.clone(),
            event_capacity: config.event_capacity.max(1),
        }
    }

    /// Create a client with a random transport id
    pub fn random_client(self: &Arc<Self>, config: &RendezvousConfig) -> MemoryTransport {
        self.client(config, PeerId::random())
    }

    /// Toggle availability; joins fail while unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Inspect a room
    pub async fn room_stats(&self, app: &str, name: &str) -> Option<RoomStats> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&RoomKey::new(app, name))
            .map(RoomStats::from_entry)
    }

    /// Number of rooms with at least one member
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn join(
        self: &Arc<Self>,
        key: RoomKey,
        self_id: &PeerId,
        capacity: usize,
    ) -> Result<(MemoryRoom, RoomEvents)> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::Transport(format!("hub unavailable, cannot join {}", key)));
        }

        let (tx, rx) = mpsc::channel(capacity);
        let mut rooms = self.rooms.write().await;
        let entry = rooms.entry(key.clone()).or_insert_with(RoomEntry::new);

        if entry.members.contains_key(self_id) {
            return Err(Error::AlreadyJoined(key.to_string()));
        }

        let joiner = Member::new(tx);

        // Existing members first, then their broadcast streams
        for (peer, member) in &entry.members {
            joiner.deliver(self_id, RoomEvent::PeerJoined(peer.clone()));
            for stream in &member.streams {
                joiner.deliver(
                    self_id,
                    RoomEvent::PeerStream {
                        stream: stream.clone(),
                        from: peer.clone(),
                    },
                );
            }
        }

        entry.fan_out(self_id, &RoomEvent::PeerJoined(self_id.clone()));
        entry.members.insert(self_id.clone(), joiner);

        tracing::debug!(
            room = %key,
            peer = %self_id,
            members = entry.members.len(),
            "Peer joined room"
        );

        let room = MemoryRoom {
            hub: Arc::clone(self),
            key,
            self_id: self_id.clone(),
            left: AtomicBool::new(false),
        };

        Ok((room, rx))
    }

    async fn leave(&self, key: &RoomKey, self_id: &PeerId) {
        let mut rooms = self.rooms.write().await;

        let Some(entry) = rooms.get_mut(key) else {
            return;
        };
        if entry.members.remove(self_id).is_none() {
            return;
        }

        entry.fan_out(self_id, &RoomEvent::PeerLeft(self_id.clone()));

        tracing::debug!(
            room = %key,
            peer = %self_id,
            members = entry.members.len(),
            "Peer left room"
        );

        if entry.is_empty() {
            rooms.remove(key);
            tracing::debug!(room = %key, "Room removed");
        }
    }

    async fn deliver(
        &self,
        key: &RoomKey,
        from: &PeerId,
        target: Option<&PeerId>,
        event: RoomEvent,
    ) -> Result<()> {
        let rooms = self.rooms.read().await;
        let entry = rooms
            .get(key)
            .filter(|entry| entry.members.contains_key(from))
            .ok_or_else(|| Error::RoomClosed(key.to_string()))?;

        match target {
            Some(target) if target == from => Ok(()),
            Some(target) => match entry.deliver_to(target, event) {
                Some(_) => Ok(()),
                None => Err(Error::PeerNotFound(target.clone())),
            },
            None => {
                entry.fan_out(from, &event);
                Ok(())
            }
        }
    }

    async fn attach_stream(&self, key: &RoomKey, from: &PeerId, stream: &MediaStream) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(key)
            .ok_or_else(|| Error::RoomClosed(key.to_string()))?;
        let member = entry
            .members
            .get_mut(from)
            .ok_or_else(|| Error::RoomClosed(key.to_string()))?;

        member.attach(stream);
        entry.fan_out(
            from,
            &RoomEvent::PeerStream {
                stream: stream.clone(),
                from: from.clone(),
            },
        );
        Ok(())
    }

    async fn detach_stream(&self, key: &RoomKey, from: &PeerId, stream_id: &StreamId) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let entry = rooms
            .get_mut(key)
            .ok_or_else(|| Error::RoomClosed(key.to_string()))?;
        let member = entry
            .members
            .get_mut(from)
            .ok_or_else(|| Error::RoomClosed(key.to_string()))?;

        if member.detach(stream_id) {
            entry.fan_out(
                from,
                &RoomEvent::StreamRemoved {
                    stream_id: stream_id.clone(),
                    from: from.clone(),
                },
            );
        }
        Ok(())
    }
}

/// A client of a [`MemoryHub`]
#[derive(Clone)]
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    self_id: PeerId,
    app_id: String,
    event_capacity: usize,
}

impl Transport for MemoryTransport {
    type Room = MemoryRoom;

    fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    async fn join(&self, room: &str) -> Result<(MemoryRoom, RoomEvents)> {
        let key = RoomKey::new(self.app_id.clone(), room);
        self.hub.join(key, &self.self_id, self.event_capacity).await
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("self_id", &self.self_id)
            .field("app_id", &self.app_id)
            .finish()
    }
}

/// Membership in a hub room
pub struct MemoryRoom {
    hub: Arc<MemoryHub>,
    key: RoomKey,
    self_id: PeerId,
    left: AtomicBool,
}

impl MemoryRoom {
    fn ensure_joined(&self) -> Result<()> {
        if self.left.load(Ordering::SeqCst) {
            return Err(Error::RoomClosed(self.key.to_string()));
        }
        Ok(())
    }
}

impl RoomHandle for MemoryRoom {
    fn name(&self) -> &str {
        &self.key.name
    }

    fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    async fn send(&self, action: &str, payload: Bytes, target: Option<&PeerId>) -> Result<()> {
        self.ensure_joined()?;
        let event = RoomEvent::Action {
            name: action.to_string(),
            payload,
            from: self.self_id.clone(),
        };
        self.hub.deliver(&self.key, &self.self_id, target, event).await
    }

    async fn add_stream(&self, stream: &MediaStream, target: Option<&PeerId>) -> Result<()> {
        self.ensure_joined()?;
        match target {
            Some(target) => {
                let event = RoomEvent::PeerStream {
                    stream: stream.clone(),
                    from: self.self_id.clone(),
                };
                self.hub
                    .deliver(&self.key, &self.self_id, Some(target), event)
                    .await
            }
            None => self.hub.attach_stream(&self.key, &self.self_id, stream).await,
        }
    }

    async fn remove_stream(&self, stream_id: &StreamId) -> Result<()> {
        self.ensure_joined()?;
        self.hub
            .detach_stream(&self.key, &self.self_id, stream_id)
            .await
    }

    async fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        self.hub.leave(&self.key, &self.self_id).await;
    }
}

impl Drop for MemoryRoom {
    fn drop(&mut self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropped without leave(); release the membership in the background
        let hub = Arc::clone(&self.hub);
        let key = self.key.clone();
        let self_id = self.self_id.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                hub.leave(&key, &self_id).await;
            });
        }
    }
}
