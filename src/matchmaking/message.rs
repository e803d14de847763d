//! Lobby wire messages
//!
//! Match negotiation uses a single `match` action carrying JSON:
//!
//! ```text
//! {"type":"propose","sessionChannelId":"devgle_aaa_bbb_1700000000000","senderId":"aaa"}
//! {"type":"accept", "sessionChannelId":"devgle_aaa_bbb_1700000000000","senderId":"bbb"}
//! ```
//!
//! Older clients spell the fields `roomId` and `from`; both are accepted on
//! decode.

use serde::{Deserialize, Serialize};

use crate::transport::{Action, PeerId};

/// Prefix of every generated session channel name
pub const SESSION_PREFIX: &str = "devgle";

/// Characters of each peer id embedded in a session channel name
const SESSION_ID_PREFIX_LEN: usize = 6;

/// Lobby action used for match negotiation
pub const MATCH_ACTION: Action<MatchMessage> = Action::new("match");

/// Name of the private channel for one matched pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionChannelId(String);

impl SessionChannelId {
    /// Derive a channel name from the initiator, the responder and a unix
    /// timestamp in milliseconds
    pub fn derive(initiator: &PeerId, responder: &PeerId, timestamp_ms: u64) -> Self {
        Self(format!(
            "{}_{}_{}_{}",
            SESSION_PREFIX,
            initiator.prefix(SESSION_ID_PREFIX_LEN),
            responder.prefix(SESSION_ID_PREFIX_LEN),
            timestamp_ms
        ))
    }

    /// Wrap an existing channel name
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the channel name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Match negotiation message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MatchMessage {
    /// Initiator offers a session channel
    Propose {
        /// Proposed session channel
        #[serde(rename = "sessionChannelId", alias = "roomId")]
        session: SessionChannelId,
        /// Transport id of the sender
        #[serde(rename = "senderId", alias = "from")]
        sender: PeerId,
    },

    /// Responder accepts a proposed session channel
    Accept {
        /// Accepted session channel
        #[serde(rename = "sessionChannelId", alias = "roomId")]
        session: SessionChannelId,
        /// Transport id of the sender
        #[serde(rename = "senderId", alias = "from")]
        sender: PeerId,
    },
}

impl MatchMessage {
    /// Session channel referenced by the message
    pub fn session(&self) -> &SessionChannelId {
        match self {
            MatchMessage::Propose { session, .. } | MatchMessage::Accept { session, .. } => session,
        }
    }

    /// Claimed sender
    pub fn sender(&self) -> &PeerId {
        match self {
            MatchMessage::Propose { sender, .. } | MatchMessage::Accept { sender, .. } => sender,
        }
    }

    /// Message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            MatchMessage::Propose { .. } => "propose",
            MatchMessage::Accept { .. } => "accept",
        }
    }
}
