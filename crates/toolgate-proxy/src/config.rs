use crate::key::KeyStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use toolgate_core::{ToolgateError, ToolgateResult};
use toolgate_security::{
    AccessPolicy, RateLimitConfig, SanitizationPipeline, DEFAULT_MAX_LENGTH,
    DEFAULT_REDACTION_MARKER, DEFAULT_TRUNCATION_MARKER,
};

/// Guard configuration, usually read from `toolgate.toml`.
///
/// ```toml
/// allowed_tools = ["search", "read_file"]
/// caller_key = "user_session"
///
/// [rate_limit]
/// requests_per_minute = 60.0
/// burst_size = 2
///
/// [sanitizer]
/// max_length = 500
/// html_escape = true
///
/// [[sanitizer.rules]]
/// pattern = '\b\d{16}\b'
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Tool names the access gate admits.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Per-caller token bucket; unlimited when absent.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Result pipeline; results pass through when absent.
    #[serde(default)]
    pub sanitizer: Option<SanitizerConfig>,
    /// How a caller identity becomes a limiter key.
    #[serde(default)]
    pub caller_key: KeyStrategy,
    /// Component name stamped on `tracing` audit events.
    #[serde(default = "default_audit_component")]
    pub audit_component: String,
}

fn default_audit_component() -> String {
    "toolgate".to_string()
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            allowed_tools: Vec::new(),
            rate_limit: None,
            sanitizer: None,
            caller_key: KeyStrategy::default(),
            audit_component: default_audit_component(),
        }
    }
}

impl GuardConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ToolgateResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ToolgateError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn load(path: &Path) -> ToolgateResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ToolgateError::Config(format!(
                "Failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ToolgateError::Config(msg) => {
                ToolgateError::Config(format!("{msg} ({})", path.display()))
            }
            other => other,
        })
    }

    /// Checks that do not need regex compilation. Rule patterns are checked
    /// by [`SanitizerConfig::build`].
    pub fn validate(&self) -> ToolgateResult<()> {
        if let Some(pos) = self.allowed_tools.iter().position(|t| t.trim().is_empty()) {
            return Err(ToolgateError::Config(format!(
                "allowed_tools[{pos}] is empty"
            )));
        }
        if let Some(sanitizer) = &self.sanitizer {
            if let Some(pos) = sanitizer.rules.iter().position(|r| r.pattern.is_empty()) {
                return Err(ToolgateError::Config(format!(
                    "sanitizer.rules[{pos}] has an empty pattern"
                )));
            }
        }
        Ok(())
    }

    /// The whitelist as a policy.
    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.allowed_tools.iter().cloned())
    }
}

/// `[sanitizer]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Output cap in characters, marker included.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Appended when output is cut.
    #[serde(default = "default_truncation_marker")]
    pub truncation_marker: String,
    /// Escape HTML special characters.
    #[serde(default)]
    pub html_escape: bool,
    /// Remove control characters other than newline, tab and CR.
    #[serde(default)]
    pub strip_control_chars: bool,
    /// Redaction rules, applied in order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

fn default_max_length() -> usize {
    DEFAULT_MAX_LENGTH
}

fn default_truncation_marker() -> String {
    DEFAULT_TRUNCATION_MARKER.to_string()
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            truncation_marker: default_truncation_marker(),
            html_escape: false,
            strip_control_chars: false,
            rules: Vec::new(),
        }
    }
}

impl SanitizerConfig {
    /// Compile into a pipeline. Stage order: control characters, HTML
    /// escaping, then redaction rules in file order.
    pub fn build(&self) -> ToolgateResult<SanitizationPipeline> {
        let mut builder = SanitizationPipeline::builder()
            .max_length(self.max_length)
            .truncation_marker(self.truncation_marker.clone());
        if self.strip_control_chars {
            builder = builder.strip_control_chars();
        }
        if self.html_escape {
            builder = builder.html_escape();
        }
        for rule in &self.rules {
            builder = builder.rule(rule.pattern.clone(), rule.replacement.clone());
        }
        builder.build()
    }
}

/// One `[[sanitizer.rules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Regular expression to match.
    pub pattern: String,
    /// Text each match is replaced with.
    #[serde(default = "default_replacement")]
    pub replacement: String,
}

fn default_replacement() -> String {
    DEFAULT_REDACTION_MARKER.to_string()
}
