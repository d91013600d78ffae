use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use toolgate_core::{CallerIdentity, CallerKey, ToolgateError, ToolgateResult};
use tracing::{error, info, warn};
use uuid::Uuid;

/// What happened at one stage of a guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Both gates passed; the tool is about to run.
    Started,
    /// The access gate rejected the tool.
    AccessDenied,
    /// The caller's bucket was empty.
    RateLimited,
    /// The tool returned an error.
    ExecutionFailed,
    /// A textual result went through the sanitization pipeline.
    Sanitized,
    /// The call finished and its result was handed back.
    Completed,
    /// The call was dropped before the tool finished.
    Cancelled,
}

impl AuditOutcome {
    /// Whether this outcome ends the call.
    pub fn is_terminal(self) -> bool {
        !matches!(self, AuditOutcome::Started | AuditOutcome::Sanitized)
    }

    /// Whether this outcome ends the call unsuccessfully.
    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != AuditOutcome::Completed
    }

    /// The snake_case name used in logs and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            AuditOutcome::Started => "started",
            AuditOutcome::AccessDenied => "access_denied",
            AuditOutcome::RateLimited => "rate_limited",
            AuditOutcome::ExecutionFailed => "execution_failed",
            AuditOutcome::Sanitized => "sanitized",
            AuditOutcome::Completed => "completed",
            AuditOutcome::Cancelled => "cancelled",
        }
    }
}

/// One audit record. Built per stage, handed to the sink, not retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Shared by every event of one call.
    pub call_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Requested tool.
    pub tool_name: String,
    /// Key the call was rate limited under.
    pub caller_key: CallerKey,
    /// Caller user id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Caller session id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Arguments as passed to the tool.
    pub args: serde_json::Value,
    /// What happened.
    pub outcome: AuditOutcome,
    /// Tool run time, on terminal events after execution began.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Advisory backoff on `RateLimited`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl AuditEvent {
    /// Create an event stamped with the current time.
    pub fn new(
        call_id: Uuid,
        tool_name: impl Into<String>,
        caller_key: CallerKey,
        args: serde_json::Value,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            call_id,
            timestamp: Utc::now(),
            tool_name: tool_name.into(),
            caller_key,
            user_id: None,
            session_id: None,
            args,
            outcome,
            duration_ms: None,
            error: None,
            retry_after_ms: None,
        }
    }

    /// Record the user and session ids.
    pub fn with_identity(mut self, identity: &CallerIdentity) -> Self {
        self.user_id.clone_from(&identity.user_id);
        self.session_id.clone_from(&identity.session_id);
        self
    }

    /// Record the elapsed tool time.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    /// Record a failure message.
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Record the advisory backoff.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }
}

/// Receiver of audit events.
///
/// Implementations report failures through the returned result; the
/// orchestrator logs and discards them so a broken sink never fails a call.
pub trait AuditSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &AuditEvent) -> ToolgateResult<()>;
}

/// Emits each event as a structured `tracing` event on target `toolgate::audit`.
#[derive(Debug, Clone)]
pub struct TracingAuditSink {
    component: String,
}

impl TracingAuditSink {
    /// A sink that tags events with `component`.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }
}

impl Default for TracingAuditSink {
    fn default() -> Self {
        Self::new("toolgate")
    }
}

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> ToolgateResult<()> {
        let user_id = event.user_id.as_deref().unwrap_or_default();
        let session_id = event.session_id.as_deref().unwrap_or_default();
        let error = event.error.as_deref().unwrap_or_default();
        match event.outcome {
            AuditOutcome::ExecutionFailed => error!(
                target: "toolgate::audit",
                component = %self.component,
                call_id = %event.call_id,
                tool = %event.tool_name,
                caller_key = %event.caller_key,
                user_id,
                session_id,
                outcome = event.outcome.as_str(),
                duration_ms = event.duration_ms,
                error,
                "audit"
            ),
            AuditOutcome::AccessDenied | AuditOutcome::RateLimited | AuditOutcome::Cancelled => {
                warn!(
                    target: "toolgate::audit",
                    component = %self.component,
                    call_id = %event.call_id,
                    tool = %event.tool_name,
                    caller_key = %event.caller_key,
                    user_id,
                    session_id,
                    outcome = event.outcome.as_str(),
                    retry_after_ms = event.retry_after_ms,
                    error,
                    "audit"
                )
            }
            AuditOutcome::Started => info!(
                target: "toolgate::audit",
                component = %self.component,
                call_id = %event.call_id,
                tool = %event.tool_name,
                caller_key = %event.caller_key,
                user_id,
                session_id,
                outcome = event.outcome.as_str(),
                args = %event.args,
                "audit"
            ),
            AuditOutcome::Sanitized | AuditOutcome::Completed => info!(
                target: "toolgate::audit",
                component = %self.component,
                call_id = %event.call_id,
                tool = %event.tool_name,
                caller_key = %event.caller_key,
                user_id,
                session_id,
                outcome = event.outcome.as_str(),
                duration_ms = event.duration_ms,
                "audit"
            ),
        }
        Ok(())
    }
}

/// Keeps events in memory, dropping the oldest past `max_entries`.
#[derive(Debug)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    max_entries: usize,
}

impl MemoryAuditSink {
    /// A sink with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Keep at most `max_entries` events.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            max_entries,
        }
    }

    /// Snapshot of the recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Outcomes in recording order.
    pub fn outcomes(&self) -> Vec<AuditOutcome> {
        self.events.lock().iter().map(|e| e.outcome).collect()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether no event is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drop every buffered event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> ToolgateResult<()> {
        let mut events = self.events.lock();
        events.push(event.clone());
        if events.len() > self.max_entries {
            let drain_count = events.len() - self.max_entries;
            events.drain(..drain_count);
        }
        Ok(())
    }
}

/// Forwards events to an async consumer over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAuditSink {
    /// Create the sink and the receiver its events arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: &AuditEvent) -> ToolgateResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| ToolgateError::Audit("audit receiver dropped".to_string()))
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) -> ToolgateResult<()> {
        Ok(())
    }
}
