//! Security gates for toolgate.
//!
//! Provides the access whitelist, the per-caller token-bucket rate limiter,
//! result sanitization, and the audit sink interface used by the call
//! orchestrator.
//!
//! # Main types
//!
//! - [`AccessGate`]: Whitelist check over an immutable [`AccessPolicy`].
//! - [`TokenBucketLimiter`]: Per-key token-bucket rate limiter, safe to share across threads.
//! - [`Clock`]: Monotonic time source; [`SystemClock`] in production, [`ManualClock`] in tests.
//! - [`SanitizationPipeline`]: Ordered [`TextSanitizer`] stages followed by a length cap.
//! - [`AuditSink`]: Receiver of [`AuditEvent`]s, with tracing, in-memory, and channel sinks.

/// Tool whitelisting.
pub mod access;
/// Audit events and sinks.
pub mod audit;
/// Time sources for the rate limiter.
pub mod clock;
/// Token-bucket rate limiting.
pub mod rate_limit;
/// Result sanitization.
pub mod sanitizer;

pub use access::{AccessGate, AccessPolicy};
pub use audit::{
    AuditEvent, AuditOutcome, AuditSink, ChannelAuditSink, MemoryAuditSink, NoopAuditSink,
    TracingAuditSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use rate_limit::{RateLimitConfig, TokenBucketLimiter};
pub use sanitizer::{
    ControlCharFilter, HtmlEscape, RedactionRule, SanitizationPipeline,
    SanitizationPipelineBuilder, TextSanitizer, DEFAULT_MAX_LENGTH, DEFAULT_REDACTION_MARKER,
    DEFAULT_TRUNCATION_MARKER,
};
