//! Call orchestration for toolgate.
//!
//! Wraps a tool invocation in the access gate, the rate limiter, result
//! sanitization, and audit emission, in that order. A rejected call never
//! reaches the tool.
//!
//! ```no_run
//! use std::sync::Arc;
//! use toolgate_core::CallerIdentity;
//! use toolgate_proxy::CallOrchestrator;
//! use toolgate_security::{MemoryAuditSink, RateLimitConfig};
//!
//! # async fn demo() -> toolgate_core::ToolgateResult<()> {
//! let guard = CallOrchestrator::builder()
//!     .allow_tools(["search"])
//!     .rate_limit(RateLimitConfig::new(60.0, 2)?)
//!     .audit_sink(Arc::new(MemoryAuditSink::new()))
//!     .build();
//!
//! let result = guard
//!     .invoke_as(
//!         "search",
//!         serde_json::json!({"query": "rust"}),
//!         &CallerIdentity::new("u1", "s1"),
//!         |args| async move { Ok::<_, std::io::Error>(args["query"].clone()) },
//!     )
//!     .await?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

/// TOML configuration surface.
pub mod config;
/// Caller key derivation strategies.
pub mod key;
/// Call lifecycle states.
pub mod lifecycle;
/// The call orchestrator.
pub mod orchestrator;
/// Tool trait and registry.
pub mod tool;

pub use config::{GuardConfig, RuleConfig, SanitizerConfig};
pub use key::{CallerKeyStrategy, KeyStrategy};
pub use lifecycle::{CallState, FailureReason};
pub use orchestrator::{CallOrchestrator, CallOrchestratorBuilder};
pub use tool::{Tool, ToolRegistry};
