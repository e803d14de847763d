//! Session-scoped anonymous identity
//!
//! The participant id is generated once per process session and never
//! persisted. Everything else only reads it.

use std::sync::OnceLock;

/// Opaque anonymous participant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short uppercase form for display (first 6 characters)
    pub fn short(&self) -> String {
        self.0.chars().take(6).collect::<String>().to_uppercase()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the local participant identity
pub trait IdentityProvider: Send + Sync + 'static {
    /// The local participant id, or `None` if it is not available yet
    fn participant_id(&self) -> Option<ParticipantId>;
}

/// Identity initialised on first use and read-only afterwards
#[derive(Debug, Default)]
pub struct SessionIdentity {
    id: OnceLock<ParticipantId>,
}

impl SessionIdentity {
    /// Lazily generated random identity
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity fixed to a known id
    pub fn with_id(id: impl Into<String>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(ParticipantId::new(id));
        Self { id: cell }
    }

    /// Get the identity, generating it on first call
    pub fn get(&self) -> &ParticipantId {
        self.id.get_or_init(ParticipantId::random)
    }
}

impl IdentityProvider for SessionIdentity {
    fn participant_id(&self) -> Option<ParticipantId> {
        Some(self.get().clone())
    }
}
