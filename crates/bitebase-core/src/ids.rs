//! Branded ID newtypes.
//!
//! String-backed IDs keep wire compatibility (clients see plain strings)
//! while preventing a session id from being passed where a server id is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one analysis run.
///
/// Generated as `sess_<uuid>` so ids are recognizable in logs and event
/// payloads.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sess_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Wrap an existing id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a configured MCP server.
///
/// Server ids come from configuration keys, not generation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Wrap a configured server id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_session_ids_are_prefixed() {
        let id = SessionId::generate();
        assert!(id.as_str().starts_with("sess_"));
        assert!(id.as_str().len() > "sess_".len());
    }

    #[test]
    fn generated_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_serializes_transparently() {
        let id = SessionId::new("sess_abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess_abc\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn server_id_round_trips() {
        let id = ServerId::new("web-scraper");
        assert_eq!(id.to_string(), "web-scraper");
        let json = serde_json::to_string(&id).unwrap();
        let back: ServerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ids_are_usable_as_map_keys() {
        let mut map = std::collections::HashMap::new();
        let _ = map.insert(ServerId::new("a"), 1);
        let _ = map.insert(ServerId::new("b"), 2);
        assert_eq!(map.get(&ServerId::new("a")), Some(&1));
    }
}
