//! Session identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a connected client session.
///
/// Derived from the client's connection identity (typically its process id
/// as a string). One session exists per distinct identity: a reconnect with
/// the same identity replaces the previous session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a new SessionId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the session id for a connection identity.
    ///
    /// The mapping is the identity function today, but callers go through
    /// this so the one-session-per-identity policy has a single seam.
    pub fn from_identity(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_identity_is_stable() {
        let a = SessionId::from_identity("4242");
        let b = SessionId::from_identity("4242");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "4242");
    }

    #[test]
    fn test_display() {
        let id = SessionId::new("client-7");
        assert_eq!(id.to_string(), "client-7");
    }
}
