//! Rendezvous configuration

use std::time::Duration;

use crate::error::{Error, Result};

/// Application identifier namespacing every channel
pub const DEFAULT_APP_ID: &str = "devgle-omegle-for-devs";

/// Shared lobby where all searching clients meet
pub const DEFAULT_LOBBY_ROOM: &str = "devgle-lobby-v3";

/// Long-lived channel used only for the online counter
pub const DEFAULT_PRESENCE_ROOM: &str = "devgle-presence-v1";

/// Suffix appended to a session channel for its chat channel
pub const DEFAULT_CHAT_SUFFIX: &str = "-chat";

/// STUN/TURN server entry handed to the transport for NAT fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    /// Server URL (`stun:`, `turn:` or `turns:`)
    pub urls: String,
    /// TURN username
    pub username: Option<String>,
    /// TURN credential
    pub credential: Option<String>,
}

impl IceServer {
    /// A STUN server (no credentials)
    pub fn stun(urls: impl Into<String>) -> Self {
        Self {
            urls: urls.into(),
            username: None,
            credential: None,
        }
    }

    /// A TURN relay with credentials
    pub fn turn(
        urls: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: urls.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// Whether this entry is a relay (TURN) rather than STUN
    pub fn is_relay(&self) -> bool {
        self.urls.starts_with("turn:") || self.urls.starts_with("turns:")
    }
}

/// Configuration shared by the coordinator, session transport and presence counter
#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    /// Application identifier; deployments with different ids never see each other
    pub app_id: String,

    /// Relay/rendezvous endpoints used by network transports
    ///
    /// Read by network `Transport` implementations; `MemoryHub` ignores it.
    pub relay_urls: Vec<String>,

    /// Number of relays to connect to simultaneously
    ///
    /// Read by network `Transport` implementations; `MemoryHub` ignores it.
    pub relay_redundancy: usize,

    /// STUN/TURN servers for when a direct connection is blocked
    ///
    /// Read by network `Transport` implementations; `MemoryHub` ignores it.
    pub ice_servers: Vec<IceServer>,

    /// Lobby channel name
    pub lobby_room: String,

    /// Presence channel name
    pub presence_room: String,

    /// Suffix for the per-session chat channel
    pub chat_suffix: String,

    /// Delay before leaving the lobby after a match
    pub match_grace: Duration,

    /// Delay before searching again after a skip
    pub skip_delay: Duration,

    /// Re-propose to a silent peer after this long (disabled when `None`)
    pub proposal_timeout: Option<Duration>,

    /// Per-membership event queue capacity
    pub event_capacity: usize,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            relay_urls: Vec::new(),
            relay_redundancy: 3,
            ice_servers: vec![IceServer::stun("stun:stun.relay.metered.ca:80")],
            lobby_room: DEFAULT_LOBBY_ROOM.to_string(),
            presence_room: DEFAULT_PRESENCE_ROOM.to_string(),
            chat_suffix: DEFAULT_CHAT_SUFFIX.to_string(),
            match_grace: Duration::from_millis(500),
            skip_delay: Duration::from_millis(1000),
            proposal_timeout: None,
            event_capacity: 256,
        }
    }
}

impl RendezvousConfig {
    /// Create a config with a custom application id
    pub fn with_app_id(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Default::default()
        }
    }

    /// Set the lobby channel name
    pub fn lobby_room(mut self, name: impl Into<String>) -> Self {
        self.lobby_room = name.into();
        self
    }

    /// Set the presence channel name
    pub fn presence_room(mut self, name: impl Into<String>) -> Self {
        self.presence_room = name.into();
        self
    }

    /// Add a relay endpoint
    pub fn relay(mut self, url: impl Into<String>) -> Self {
        self.relay_urls.push(url.into());
        self
    }

    /// Set relay redundancy
    pub fn relay_redundancy(mut self, count: usize) -> Self {
        self.relay_redundancy = count;
        self
    }

    /// Add a STUN/TURN server
    pub fn ice_server(mut self, server: IceServer) -> Self {
        self.ice_servers.push(server);
        self
    }

    /// Set the post-match lobby grace delay
    pub fn match_grace(mut self, delay: Duration) -> Self {
        self.match_grace = delay;
        self
    }

    /// Set the skip restart delay
    pub fn skip_delay(mut self, delay: Duration) -> Self {
        self.skip_delay = delay;
        self
    }

    /// Enable proposal retry after `timeout`
    pub fn proposal_timeout(mut self, timeout: Duration) -> Self {
        self.proposal_timeout = Some(timeout);
        self
    }

    /// Set the per-membership event queue capacity
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Chat channel name for a session channel
    pub fn chat_room(&self, session: &str) -> String {
        format!("{}{}", session, self.chat_suffix)
    }

    /// Reject configurations no transport can work with
    pub fn validate(&self) -> Result<()> {
        if self.app_id.trim().is_empty() {
            return Err(Error::Config("app_id must not be empty".into()));
        }
        if self.lobby_room.is_empty() || self.presence_room.is_empty() {
            return Err(Error::Config("room names must not be empty".into()));
        }
        if self.lobby_room == self.presence_room {
            return Err(Error::Config(
                "lobby and presence rooms must differ".into(),
            ));
        }
        if !self.relay_urls.is_empty() && self.relay_redundancy == 0 {
            return Err(Error::Config(
                "relay_redundancy must be at least 1 when relays are configured".into(),
            ));
        }
        if self.proposal_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(Error::Config(
                "proposal_timeout must be non-zero; omit it to disable retries".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RendezvousConfig::default();

        assert_eq!(config.app_id, DEFAULT_APP_ID);
        assert_eq!(config.lobby_room, "devgle-lobby-v3");
        assert_eq!(config.presence_room, "devgle-presence-v1");
        assert_eq!(config.match_grace, Duration::from_millis(500));
        assert_eq!(config.skip_delay, Duration::from_secs(1));
        assert!(config.proposal_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chat_room() {
        let config = RendezvousConfig::default();
        assert_eq!(config.chat_room("devgle_aaa_bbb_1"), "devgle_aaa_bbb_1-chat");
    }

    #[test]
    fn test_builder_chaining() {
        let config = RendezvousConfig::with_app_id("test-app")
            .lobby_room("lobby")
            .presence_room("presence")
            .relay("wss://relay.example")
            .relay_redundancy(1)
            .ice_server(IceServer::turn("turn:turn.example:443", "user", "secret"))
            .match_grace(Duration::from_millis(50))
            .skip_delay(Duration::from_millis(100))
            .proposal_timeout(Duration::from_secs(2))
            .event_capacity(16);

        assert_eq!(config.app_id, "test-app");
        assert_eq!(config.lobby_room, "lobby");
        assert_eq!(config.relay_urls, vec!["wss://relay.example".to_string()]);
        assert_eq!(config.ice_servers.len(), 2);
        assert!(config.ice_servers[1].is_relay());
        assert!(!config.ice_servers[0].is_relay());
        assert_eq!(config.proposal_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.event_capacity, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_app_id() {
        let config = RendezvousConfig::with_app_id("  ");
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_shared_room_names() {
        let config = RendezvousConfig::default()
            .lobby_room("same")
            .presence_room("same");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_redundancy_with_relays() {
        let config = RendezvousConfig::default()
            .relay("wss://relay.example")
            .relay_redundancy(0);
        assert!(config.validate().is_err());

        // Without relays redundancy is irrelevant
        let config = RendezvousConfig::default().relay_redundancy(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_proposal_timeout() {
        let config = RendezvousConfig::default().proposal_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = RendezvousConfig::default().proposal_timeout(Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = RendezvousConfig::default().event_capacity(0);
        assert!(config.validate().is_err());
    }
}
