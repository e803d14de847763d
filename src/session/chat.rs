//! Ancillary text chat for a matched pair
//!
//! Chat runs on its own channel (`<session><chat_suffix>`) so that it never
//! interferes with media negotiation. Messages are appended locally as soon
//! as they are sent and deduplicated by id on receipt.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::unix_millis;
use crate::config::RendezvousConfig;
use crate::identity::ParticipantId;
use crate::matchmaking::SessionChannelId;
use crate::transport::{Action, RoomEvent, RoomEvents, RoomHandle, Transport};

/// Sender recorded on locally generated notices
pub const SYSTEM_SENDER: &str = "system";

/// Session chat action
pub const CHAT_ACTION: Action<ChatWire> = Action::new("chat");

/// A chat line as shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Unique message id
    pub id: String,
    /// Message body
    pub text: String,
    /// Sender participant id, or [`SYSTEM_SENDER`]
    pub from: String,
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    /// Whether the local participant sent it
    pub is_mine: bool,
}

/// Chat payload on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatWire {
    id: String,
    text: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    timestamp: u64,
}

/// Chat over a session's ancillary channel
pub struct ChatChannel<T: Transport> {
    room: Option<Arc<T::Room>>,
    local: ParticipantId,
    messages_tx: Arc<watch::Sender<Vec<ChatMessage>>>,
    messages: watch::Receiver<Vec<ChatMessage>>,
    pump: Option<JoinHandle<()>>,
}

impl<T: Transport> ChatChannel<T> {
    /// Join the chat channel for `session`
    ///
    /// A join failure is logged and leaves the channel closed; sends are then
    /// ignored.
    pub async fn open(
        transport: &T,
        config: &RendezvousConfig,
        session: &SessionChannelId,
        local: ParticipantId,
    ) -> Self {
        let (messages_tx, messages) = watch::channel(Vec::new());
        let messages_tx = Arc::new(messages_tx);
        let room_name = config.chat_room(session.as_str());

        let (room, pump) = match transport.join(&room_name).await {
            Ok((room, events)) => {
                tracing::info!(room = %room_name, participant = %local.short(), "Joined chat channel");
                let room = Arc::new(room);
                let pump = tokio::spawn(pump_messages(events, local.clone(), Arc::clone(&messages_tx)));
                (Some(room), Some(pump))
            }
            Err(e) => {
                tracing::error!(room = %room_name, error = %e, "Failed to join chat channel");
                (None, None)
            }
        };

        Self {
            room,
            local,
            messages_tx,
            messages,
            pump,
        }
    }

    /// Send a message to the remote peer
    ///
    /// Blank text is ignored. The message is appended locally before it is
    /// sent.
    pub async fn send(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let Some(room) = &self.room else {
            return;
        };

        let timestamp = unix_millis();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{}_{}_{}", self.local, timestamp, &nonce[..10]);

        let wire = ChatWire {
            id: id.clone(),
            text: text.to_string(),
            from: self.local.to_string(),
            timestamp,
        };

        self.messages_tx.send_modify(|messages| {
            messages.push(ChatMessage {
                id,
                text: wire.text.clone(),
                from: wire.from.clone(),
                timestamp,
                is_mine: true,
            });
        });

        if let Err(e) = CHAT_ACTION.send(room.as_ref(), &wire, None).await {
            tracing::warn!(error = %e, "Failed to send chat message");
        }
    }

    /// Messages in arrival order
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.borrow().clone()
    }

    /// Watch the message list
    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.messages.clone()
    }

    /// Drop all history
    pub fn clear(&self) {
        self.messages_tx.send_if_modified(|messages| {
            if messages.is_empty() {
                return false;
            }
            messages.clear();
            true
        });
    }

    /// Whether the chat channel is joined
    pub fn is_open(&self) -> bool {
        self.room.is_some()
    }

    /// Leave the chat channel. Idempotent.
    pub async fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(room) = self.room.take() {
            room.leave().await;
            tracing::debug!(room = %room.name(), "Left chat channel");
        }
    }
}

impl<T: Transport> Drop for ChatChannel<T> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(room) = self.room.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { room.leave().await });
            }
        }
    }
}

async fn pump_messages(
    mut events: RoomEvents,
    local: ParticipantId,
    messages_tx: Arc<watch::Sender<Vec<ChatMessage>>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            RoomEvent::PeerJoined(peer) => {
                let timestamp = unix_millis();
                messages_tx.send_modify(|messages| {
                    messages.push(ChatMessage {
                        id: format!("sys_{}_{}", timestamp, peer),
                        text: format!("System: Connected to peer {}", peer.prefix(6)),
                        from: SYSTEM_SENDER.to_string(),
                        timestamp,
                        is_mine: false,
                    });
                });
            }
            RoomEvent::PeerLeft(peer) => {
                tracing::debug!(peer = %peer, "Chat peer left");
            }
            RoomEvent::Action {
                name,
                payload,
                from,
            } if CHAT_ACTION.matches(&name) => {
                let wire = match CHAT_ACTION.decode(&payload) {
                    Ok(wire) if !wire.id.is_empty() && !wire.text.is_empty() => wire,
                    Ok(_) => {
                        tracing::debug!(peer = %from, "Dropping empty chat message");
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(peer = %from, error = %e, "Dropping malformed chat message");
                        continue;
                    }
                };

                let is_mine = wire.from == local.as_str();
                let added = messages_tx.send_if_modified(|messages| {
                    if messages.iter().any(|m| m.id == wire.id) {
                        return false;
                    }
                    messages.push(ChatMessage {
                        id: wire.id.clone(),
                        text: wire.text.clone(),
                        from: wire.from.clone(),
                        timestamp: if wire.timestamp > 0 {
                            wire.timestamp
                        } else {
                            unix_millis()
                        },
                        is_mine,
                    });
                    true
                });
                if !added {
                    tracing::debug!(id = %wire.id, "Duplicate chat message");
                }
            }
            _ => {}
        }
    }
}
