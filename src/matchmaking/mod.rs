//! Decentralized matchmaking
//!
//! Searching clients meet in a shared lobby room. There is no arbiter: each
//! pair decides locally who initiates by comparing transport ids.
//!
//! ```text
//!      "aaa"                      lobby                      "bbb"
//!        │  ◄────── PeerJoined("bbb") / PeerJoined("aaa") ──────►  │
//!        │                                                          │
//!        │  "aaa" < "bbb": initiator                                │
//!        │ ── propose { devgle_aaa_bbb_<ts>, "aaa" } ─────────────► │
//!        │                                                          │  latch set
//!        │ ◄───────────── accept { devgle_aaa_bbb_<ts>, "bbb" } ─── │  matched (responder)
//!  latch set                                                        │
//!  matched (initiator)                                              │
//!        │                                                          │
//!        └──── both leave the lobby after the grace delay ──────────┘
//! ```
//!
//! Every cycle has a one-shot latch; once it is set, late or competing
//! proposals are dropped without error.

pub mod coordinator;
pub mod message;
pub mod state;

pub use coordinator::{MatchSnapshot, Matchmaker};
pub use message::{MatchMessage, SessionChannelId, MATCH_ACTION, SESSION_PREFIX};
pub use state::{Handled, MatchLatch, MatchOutcome, MatchState, Outgoing, SearchCycle};
