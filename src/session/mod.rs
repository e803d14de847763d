//! Per-match session
//!
//! Once matchmaking pairs two participants, both join the private session
//! channel named by the match. This module provides:
//! - Session connection state and remote stream tracking
//! - Outbound stream attachment with late-joiner re-send
//! - Text chat on an ancillary channel
//!
//! # Lifecycle
//!
//! ```text
//!  Idle ──connect()──► Connecting ──peer/stream seen──► Connected
//!   ▲                      │                                │
//!   │                 join failed                      peer left
//!   │                      ▼                                ▼
//!   └────disconnect()─── Disconnected ◄─────────────────────┘
//! ```

pub mod chat;
pub mod state;
pub mod transport;

pub use chat::{ChatChannel, ChatMessage, CHAT_ACTION, SYSTEM_SENDER};
pub use state::{ConnectionState, SessionSnapshot};
pub use transport::SessionTransport;
