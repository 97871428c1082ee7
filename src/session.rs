//! Acting-user context
//!
//! The session is passed explicitly into every component that needs the
//! current user. There is no ambient global: whoever constructs the engine
//! decides whose data it operates on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque user identifier resolved by the external auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-user sync session.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: UserId,
}

impl Session {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }
}
