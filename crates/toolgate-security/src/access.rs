use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use toolgate_core::{ToolgateError, ToolgateResult};
use tracing::debug;

/// The set of tool names a guard lets through.
///
/// Immutable once built; anything not listed is denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    allowed_tools: HashSet<String>,
}

impl AccessPolicy {
    /// Build a policy from any collection of tool names.
    pub fn new<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_tools: tools.into_iter().map(Into::into).collect(),
        }
    }

    /// A policy that denies every tool.
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Whether `tool_name` is whitelisted.
    pub fn allows(&self, tool_name: &str) -> bool {
        !tool_name.is_empty() && self.allowed_tools.contains(tool_name)
    }

    /// Sorted snapshot of the allowed names.
    pub fn allowed_tools(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = self.allowed_tools.iter().map(String::as_str).collect();
        tools.sort_unstable();
        tools
    }

    /// Number of whitelisted tools.
    pub fn len(&self) -> usize {
        self.allowed_tools.len()
    }

    /// Whether the policy denies everything.
    pub fn is_empty(&self) -> bool {
        self.allowed_tools.is_empty()
    }
}

/// First gate of the pipeline: rejects tools that are not whitelisted.
#[derive(Debug, Clone, Default)]
pub struct AccessGate {
    policy: Arc<AccessPolicy>,
}

impl AccessGate {
    /// Create a gate enforcing `policy`.
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    /// Fails with [`ToolgateError::AccessDenied`] when `tool_name` is not allowed.
    pub fn check(&self, tool_name: &str) -> ToolgateResult<()> {
        if self.policy.allows(tool_name) {
            Ok(())
        } else {
            debug!(tool = %tool_name, "Tool not on whitelist");
            Err(ToolgateError::AccessDenied {
                tool_name: tool_name.to_string(),
            })
        }
    }

    /// Like [`AccessGate::check`], without the error.
    pub fn is_allowed(&self, tool_name: &str) -> bool {
        self.policy.allows(tool_name)
    }

    /// The policy this gate enforces.
    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }
}

impl From<AccessPolicy> for AccessGate {
    fn from(policy: AccessPolicy) -> Self {
        Self::new(policy)
    }
}
