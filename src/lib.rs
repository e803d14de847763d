//! Decentralized matchmaking for one-to-one video chat
//!
//! Clients pair up without a matchmaking server. Searchers meet in a shared
//! lobby channel, agree on a private session channel with a two-message
//! handshake and then exchange media and chat there.
//!
//! # Architecture
//!
//! ```text
//!    Matchmaker ──join──► lobby ──propose/accept──► MatchSnapshot { room_id }
//!                                                          │
//!                                                          ▼
//!    SessionTransport ──join──► <room_id>        streams, connection state
//!    ChatChannel      ──join──► <room_id>-chat   text messages
//!    PresenceCounter  ──join──► presence         online count
//! ```
//!
//! Every component talks to the network only through the
//! [`transport::Transport`] contract. [`MemoryHub`] implements it in-process.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use devgle::{Matchmaker, MatchState, MemoryHub, RendezvousConfig, SessionIdentity};
//!
//! # async fn example() {
//! let config = RendezvousConfig::default();
//! let hub = MemoryHub::new();
//!
//! let alice = Matchmaker::spawn(hub.random_client(&config), Arc::new(SessionIdentity::new()), config.clone());
//! let bob = Matchmaker::spawn(hub.random_client(&config), Arc::new(SessionIdentity::new()), config);
//! alice.start_searching();
//! bob.start_searching();
//!
//! let mut updates = alice.subscribe();
//! while updates.borrow().state != MatchState::Matched {
//!     updates.changed().await.unwrap();
//! }
//! println!("session {:?}", alice.snapshot().room_id);
//! # }
//! ```

mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod matchmaking;
pub mod presence;
pub mod session;
pub mod transport;

pub use config::{IceServer, RendezvousConfig};
pub use error::{Error, Result};
pub use identity::{IdentityProvider, ParticipantId, SessionIdentity};
pub use matchmaking::{MatchSnapshot, MatchState, Matchmaker, SessionChannelId};
pub use presence::PresenceCounter;
pub use session::{ChatChannel, ChatMessage, ConnectionState, SessionSnapshot, SessionTransport};
pub use transport::{MediaStream, MemoryHub, PeerId, StreamRole};
