//! Core types and error definitions for toolgate.
//!
//! This crate provides the foundational types shared across all toolgate crates:
//! the unified error type, caller identities and keys, and the tool call
//! representations the guard wraps.
//!
//! # Main types
//!
//! - [`ToolgateError`]: Unified error enum; each gate fails with its own variant.
//! - [`ToolgateResult`]: Convenience alias for `Result<T, ToolgateError>`.
//! - [`CallerIdentity`]: User and session identifiers of the party calling a tool.
//! - [`CallerKey`]: The derived identity string that partitions rate-limit state.
//! - [`ToolCall`]: A request to invoke a named tool with JSON arguments.
//! - [`ToolResult`]: The textual result returned after executing a tool call.

/// Error types.
pub mod error;
/// Caller identities and rate-limit keys.
pub mod identity;
/// Tool call and result types.
pub mod tool;

pub use error::{ToolError, ToolgateError, ToolgateResult};
pub use identity::{CallerIdentity, CallerKey};
pub use tool::{ToolCall, ToolResult};
