use serde::{Deserialize, Serialize};
use toolgate_core::{CallerIdentity, CallerKey};

/// Turns a caller identity into the key that partitions limiter state.
///
/// Implemented by [`KeyStrategy`] and by any
/// `Fn(&CallerIdentity, &str) -> CallerKey` closure.
pub trait CallerKeyStrategy: Send + Sync {
    /// Derive the key for a call to `tool_name` made by `identity`.
    fn derive(&self, identity: &CallerIdentity, tool_name: &str) -> CallerKey;
}

impl<F> CallerKeyStrategy for F
where
    F: Fn(&CallerIdentity, &str) -> CallerKey + Send + Sync,
{
    fn derive(&self, identity: &CallerIdentity, tool_name: &str) -> CallerKey {
        self(identity, tool_name)
    }
}

/// Built-in key derivations. Missing ids render as `anonymous`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// `user:session`, one bucket per session.
    #[default]
    UserSession,
    /// One bucket per user across sessions.
    User,
    /// One bucket per session.
    Session,
    /// `user:session:tool` when both ids are known, else the bare tool name.
    PerTool,
}

impl CallerKeyStrategy for KeyStrategy {
    fn derive(&self, identity: &CallerIdentity, tool_name: &str) -> CallerKey {
        match self {
            KeyStrategy::UserSession => CallerKey::new(format!(
                "{}:{}",
                identity.user_or_anonymous(),
                identity.session_or_anonymous()
            )),
            KeyStrategy::User => CallerKey::new(identity.user_or_anonymous()),
            KeyStrategy::Session => CallerKey::new(identity.session_or_anonymous()),
            KeyStrategy::PerTool => match (&identity.user_id, &identity.session_id) {
                (Some(user), Some(session)) => {
                    CallerKey::new(format!("{user}:{session}:{tool_name}"))
                }
                _ => CallerKey::new(tool_name),
            },
        }
    }
}
