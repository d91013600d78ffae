use regex::{NoExpand, Regex};
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;
use toolgate_core::{ToolgateError, ToolgateResult};

/// Marker substituted for redacted matches unless a rule says otherwise.
pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";
/// Marker appended to truncated output.
pub const DEFAULT_TRUNCATION_MARKER: &str = "...";
/// Default output cap, in characters.
pub const DEFAULT_MAX_LENGTH: usize = 1000;

/// A single text-to-text sanitization step.
///
/// The pipeline only depends on this capability, so callers can plug in their
/// own stages next to the built-in ones.
pub trait TextSanitizer: Send + Sync + Debug {
    /// Sanitize `text`, borrowing it back when nothing changed.
    fn apply<'a>(&self, text: &'a str) -> Cow<'a, str>;
}

/// Replaces every match of a pattern with a fixed marker.
#[derive(Debug, Clone)]
pub struct RedactionRule {
    pattern: Regex,
    replacement: String,
}

impl RedactionRule {
    /// Compile a rule. An invalid pattern is a configuration error.
    pub fn new(pattern: &str, replacement: impl Into<String>) -> ToolgateResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            ToolgateError::Sanitization(format!("invalid pattern '{pattern}': {e}"))
        })?;
        Ok(Self {
            pattern,
            replacement: replacement.into(),
        })
    }

    /// A rule using [`DEFAULT_REDACTION_MARKER`].
    pub fn redact(pattern: &str) -> ToolgateResult<Self> {
        Self::new(pattern, DEFAULT_REDACTION_MARKER)
    }

    /// The compiled pattern.
    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Text each match is replaced with.
    pub fn replacement(&self) -> &str {
        &self.replacement
    }
}

impl TextSanitizer for RedactionRule {
    fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        // Markers are literal; `$1` in a marker is not a capture reference.
        self.pattern
            .replace_all(text, NoExpand(self.replacement.as_str()))
    }
}

/// Escapes HTML special characters (`& < > " '`).
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEscape;

impl TextSanitizer for HtmlEscape {
    fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !text.contains(['&', '<', '>', '"', '\'']) {
            return Cow::Borrowed(text);
        }
        let mut escaped = String::with_capacity(text.len() + text.len() / 8);
        for c in text.chars() {
            match c {
                '&' => escaped.push_str("&amp;"),
                '<' => escaped.push_str("&lt;"),
                '>' => escaped.push_str("&gt;"),
                '"' => escaped.push_str("&quot;"),
                '\'' => escaped.push_str("&#x27;"),
                other => escaped.push(other),
            }
        }
        Cow::Owned(escaped)
    }
}

/// Strips control characters to prevent log poisoning and terminal injection.
///
/// Newlines, tabs and carriage returns are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlCharFilter;

impl TextSanitizer for ControlCharFilter {
    fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let keep = |c: &char| !c.is_control() || matches!(*c, '\n' | '\t' | '\r');
        if text.chars().all(|c| keep(&c)) {
            return Cow::Borrowed(text);
        }
        Cow::Owned(text.chars().filter(keep).collect())
    }
}

/// Ordered sanitization stages followed by a length cap.
///
/// Applying a pipeline twice is not guaranteed to be idempotent: a stage may
/// emit text that an earlier stage would have matched.
#[derive(Debug, Clone)]
pub struct SanitizationPipeline {
    stages: Vec<Arc<dyn TextSanitizer>>,
    max_length: usize,
    truncation_marker: String,
}

impl Default for SanitizationPipeline {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            max_length: DEFAULT_MAX_LENGTH,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
        }
    }
}

impl SanitizationPipeline {
    /// Start an empty pipeline with default limits.
    pub fn builder() -> SanitizationPipelineBuilder {
        SanitizationPipelineBuilder::default()
    }

    /// Run every stage in order, then cap the length.
    ///
    /// The result never exceeds `max_length` characters, truncation marker
    /// included.
    pub fn apply(&self, text: &str) -> String {
        let mut current: Cow<'_, str> = Cow::Borrowed(text);
        for stage in &self.stages {
            let changed = match stage.apply(&current) {
                Cow::Borrowed(_) => None,
                Cow::Owned(changed) => Some(changed),
            };
            if let Some(changed) = changed {
                current = Cow::Owned(changed);
            }
        }
        self.truncate(current)
    }

    fn truncate(&self, text: Cow<'_, str>) -> String {
        if text.chars().count() <= self.max_length {
            return text.into_owned();
        }

        let marker_len = self.truncation_marker.chars().count();
        let (keep, marker) = if marker_len > self.max_length {
            (self.max_length, "")
        } else {
            (self.max_length - marker_len, self.truncation_marker.as_str())
        };
        let cut = text
            .char_indices()
            .nth(keep)
            .map_or(text.len(), |(idx, _)| idx);
        format!("{}{}", &text[..cut], marker)
    }

    /// Output cap in characters.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Appended when output is cut.
    pub fn truncation_marker(&self) -> &str {
        &self.truncation_marker
    }

    /// Number of configured stages.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

enum PendingStage {
    Rule {
        pattern: String,
        replacement: String,
    },
    Ready(Arc<dyn TextSanitizer>),
}

/// Builder for [`SanitizationPipeline`].
///
/// Patterns are compiled in [`build`](Self::build), so a malformed rule fails
/// once at construction instead of on every call.
pub struct SanitizationPipelineBuilder {
    stages: Vec<PendingStage>,
    max_length: usize,
    truncation_marker: String,
}

impl Default for SanitizationPipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            max_length: DEFAULT_MAX_LENGTH,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
        }
    }
}

impl SanitizationPipelineBuilder {
    /// Redact matches of `pattern` with [`DEFAULT_REDACTION_MARKER`].
    pub fn redact(self, pattern: impl Into<String>) -> Self {
        self.rule(pattern, DEFAULT_REDACTION_MARKER)
    }

    /// Replace matches of `pattern` with `replacement`.
    pub fn rule(mut self, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.stages.push(PendingStage::Rule {
            pattern: pattern.into(),
            replacement: replacement.into(),
        });
        self
    }

    /// Append an [`HtmlEscape`] stage.
    pub fn html_escape(self) -> Self {
        self.stage(HtmlEscape)
    }

    /// Append a [`ControlCharFilter`] stage.
    pub fn strip_control_chars(self) -> Self {
        self.stage(ControlCharFilter)
    }

    /// Append a custom stage.
    pub fn stage(mut self, stage: impl TextSanitizer + 'static) -> Self {
        self.stages.push(PendingStage::Ready(Arc::new(stage)));
        self
    }

    /// Cap output at `max_length` characters.
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Marker appended on truncation.
    pub fn truncation_marker(mut self, marker: impl Into<String>) -> Self {
        self.truncation_marker = marker.into();
        self
    }

    /// Compile all rules.
    pub fn build(self) -> ToolgateResult<SanitizationPipeline> {
        let stages = self
            .stages
            .into_iter()
            .map(|stage| -> ToolgateResult<Arc<dyn TextSanitizer>> {
                match stage {
                    PendingStage::Rule {
                        pattern,
                        replacement,
                    } => Ok(Arc::new(RedactionRule::new(&pattern, replacement)?)),
                    PendingStage::Ready(stage) => Ok(stage),
                }
            })
            .collect::<ToolgateResult<Vec<_>>>()?;

        Ok(SanitizationPipeline {
            stages,
            max_length: self.max_length,
            truncation_marker: self.truncation_marker,
        })
    }
}
