//! Document keys and temporary identifiers
//!
//! An optimistically created entity gets a [`DocKey::Local`] so the UI can
//! render it before the server confirms; once the create resolves, the store
//! swaps it for the server-assigned [`DocKey::Remote`]. Both forms are plain
//! map keys, so nothing holds references across the async boundary.

use std::fmt;
use uuid::Uuid;

/// Key for one document in the local projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocKey {
    /// Locally generated placeholder, not yet confirmed by the server
    Local(Uuid),
    /// Server-assigned identifier
    Remote(String),
}

impl DocKey {
    /// Mint a fresh temporary key for an optimistic creation.
    pub fn fresh_local() -> Self {
        DocKey::Local(Uuid::new_v4())
    }

    pub fn remote(id: impl Into<String>) -> Self {
        DocKey::Remote(id.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, DocKey::Local(_))
    }

    /// Server id, if this key has been confirmed.
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            DocKey::Remote(id) => Some(id),
            DocKey::Local(_) => None,
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Namespaced so a placeholder can never collide with a server id.
            DocKey::Local(uuid) => write!(f, "local-{}", uuid),
            DocKey::Remote(id) => f.write_str(id),
        }
    }
}
