use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder used when an identity part is missing from a derived key.
pub const ANONYMOUS: &str = "anonymous";

/// The party on whose behalf a tool is called.
///
/// Both parts are optional; key strategies decide how missing parts are
/// rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// User identifier, if known.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Session identifier, if known.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl CallerIdentity {
    /// Creates an identity with both a user and a session.
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            session_id: Some(session_id.into()),
        }
    }

    /// Creates an identity that only carries a user id.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            session_id: None,
        }
    }

    /// Creates an identity with neither part set.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// User id, or [`ANONYMOUS`].
    pub fn user_or_anonymous(&self) -> &str {
        self.user_id.as_deref().unwrap_or(ANONYMOUS)
    }

    /// Session id, or [`ANONYMOUS`].
    pub fn session_or_anonymous(&self) -> &str {
        self.session_id.as_deref().unwrap_or(ANONYMOUS)
    }
}

/// Identity string partitioning rate-limiter state.
///
/// Two calls with equal keys share a token bucket; different keys never
/// interfere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallerKey(String);

impl CallerKey {
    /// Wraps an already-derived key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CallerKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for CallerKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl AsRef<str> for CallerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_fallbacks() {
        let id = CallerIdentity::user("alice");
        assert_eq!(id.user_or_anonymous(), "alice");
        assert_eq!(id.session_or_anonymous(), ANONYMOUS);
        assert_eq!(CallerIdentity::anonymous().user_or_anonymous(), ANONYMOUS);
    }

    #[test]
    fn test_caller_key_is_transparent_in_json() {
        let key = CallerKey::from("u1:s1");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"u1:s1\"");
        assert_eq!(key.to_string(), "u1:s1");
    }
}
