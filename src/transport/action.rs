//! Typed named actions
//!
//! A room carries opaque `Bytes` payloads tagged with an action name. An
//! [`Action`] binds a name to a message type and handles JSON encoding so
//! that each protocol layer only deals with its own typed messages.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

use super::{PeerId, RoomHandle};

/// A named, typed message channel within a room
pub struct Action<M> {
    name: &'static str,
    _marker: PhantomData<fn() -> M>,
}

impl<M> Action<M> {
    /// Bind an action name to a message type
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Action name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether an incoming event belongs to this action
    pub fn matches(&self, name: &str) -> bool {
        self.name == name
    }
}

impl<M: Serialize + DeserializeOwned> Action<M> {
    /// Encode a message into a payload
    pub fn encode(&self, message: &M) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(message)?))
    }

    /// Decode a payload into a message
    pub fn decode(&self, payload: &[u8]) -> Result<M> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encode and send a message to one peer, or to all peers
    pub async fn send<R: RoomHandle>(
        &self,
        room: &R,
        message: &M,
        target: Option<&PeerId>,
    ) -> Result<()> {
        let payload = self.encode(message)?;
        room.send(self.name, payload, target).await
    }
}

impl<M> Clone for Action<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Action<M> {}

impl<M> std::fmt::Debug for Action<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}
