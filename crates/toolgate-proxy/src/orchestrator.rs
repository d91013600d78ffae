use crate::config::GuardConfig;
use crate::key::{CallerKeyStrategy, KeyStrategy};
use crate::lifecycle::{CallState, FailureReason};
use crate::tool::Tool;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use toolgate_core::{CallerIdentity, CallerKey, ToolError, ToolgateError, ToolgateResult};
use toolgate_security::{
    AccessGate, AccessPolicy, AuditEvent, AuditOutcome, AuditSink, RateLimitConfig,
    SanitizationPipeline, TokenBucketLimiter, TracingAuditSink,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Runs tool calls through the access gate, the rate limiter, sanitization,
/// and audit emission.
///
/// Holds no per-call state; one orchestrator can serve any number of
/// concurrent calls. The limiter is the only shared mutable piece and may be
/// shared between orchestrators through [`CallOrchestratorBuilder::limiter`].
pub struct CallOrchestrator {
    access: AccessGate,
    limiter: Option<Arc<TokenBucketLimiter>>,
    sanitizer: Option<SanitizationPipeline>,
    audit: Arc<dyn AuditSink>,
    key_strategy: Box<dyn CallerKeyStrategy>,
}

impl CallOrchestrator {
    /// Start building an orchestrator that denies every tool.
    pub fn builder() -> CallOrchestratorBuilder {
        CallOrchestratorBuilder::default()
    }

    /// Build an orchestrator from configuration.
    ///
    /// Sanitization rules are compiled here, so a malformed pattern fails now
    /// rather than on a call.
    pub fn from_config(config: &GuardConfig, audit: Arc<dyn AuditSink>) -> ToolgateResult<Self> {
        config.validate()?;
        let mut builder = Self::builder()
            .access_policy(config.access_policy())
            .key_strategy(config.caller_key)
            .audit_sink(audit);
        if let Some(rate_limit) = config.rate_limit {
            builder = builder.rate_limit(rate_limit);
        }
        if let Some(sanitizer) = &config.sanitizer {
            builder = builder.sanitizer(sanitizer.build()?);
        }
        Ok(builder.build())
    }

    /// Invoke `tool` under `caller_key`.
    ///
    /// The tool receives `args` unchanged. A textual (`Value::String`) result
    /// is sanitized when a pipeline is configured; other results pass through.
    #[instrument(skip_all, fields(tool = %tool_name, caller_key = %caller_key))]
    pub async fn invoke<F, Fut, E>(
        &self,
        tool_name: &str,
        args: Value,
        caller_key: &CallerKey,
        tool: F,
    ) -> ToolgateResult<Value>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Into<ToolError>,
    {
        self.run(tool_name, args, caller_key, None, tool).await
    }

    /// Invoke `tool` for `identity`, deriving the caller key with the
    /// configured strategy. User and session ids are recorded on every event.
    #[instrument(skip_all, fields(tool = %tool_name, user = identity.user_or_anonymous()))]
    pub async fn invoke_as<F, Fut, E>(
        &self,
        tool_name: &str,
        args: Value,
        identity: &CallerIdentity,
        tool: F,
    ) -> ToolgateResult<Value>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Into<ToolError>,
    {
        let caller_key = self.key_strategy.derive(identity, tool_name);
        self.run(tool_name, args, &caller_key, Some(identity), tool)
            .await
    }

    /// Invoke a [`Tool`] object.
    pub async fn invoke_tool(
        &self,
        tool: &dyn Tool,
        args: Value,
        identity: &CallerIdentity,
    ) -> ToolgateResult<Value> {
        self.invoke_as(tool.name(), args, identity, |args| tool.call(args))
            .await
    }

    async fn run<F, Fut, E>(
        &self,
        tool_name: &str,
        args: Value,
        caller_key: &CallerKey,
        identity: Option<&CallerIdentity>,
        tool: F,
    ) -> ToolgateResult<Value>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Into<ToolError>,
    {
        let mut call = CallLifecycle::new(
            &*self.audit,
            tool_name,
            caller_key.clone(),
            identity,
            args.clone(),
        );

        if let Err(err) = self.access.check(tool_name) {
            call.fail(FailureReason::AccessDenied, |event| event.with_error(&err));
            return Err(err);
        }
        call.advance(CallState::AccessChecked);

        if let Some(limiter) = &self.limiter {
            if let Err(err) = limiter.try_acquire(caller_key) {
                let retry_after = err.retry_after();
                call.fail(FailureReason::RateLimited, |event| {
                    let event = event.with_error(&err);
                    match retry_after {
                        Some(retry_after) => event.with_retry_after(retry_after),
                        None => event,
                    }
                });
                return Err(err);
            }
        }
        call.advance(CallState::RateChecked);

        call.advance(CallState::Executing);
        call.emit(AuditOutcome::Started, |event| event);

        let value = match tool(args).await {
            Ok(value) => value,
            Err(err) => {
                let err: ToolError = err.into();
                call.fail(FailureReason::ExecutionFailed, |event| event.with_error(&err));
                return Err(ToolgateError::ExecutionFailed(err));
            }
        };

        call.advance(CallState::Sanitizing);
        let value = match (&self.sanitizer, value) {
            (Some(pipeline), Value::String(text)) => {
                let clean = pipeline.apply(&text);
                call.emit(AuditOutcome::Sanitized, |event| event);
                Value::String(clean)
            }
            (_, value) => value,
        };

        call.advance(CallState::Completed);
        call.emit(AuditOutcome::Completed, |event| event);
        Ok(value)
    }

    /// The gate consulted first on every call.
    pub fn access_gate(&self) -> &AccessGate {
        &self.access
    }

    /// The limiter, if one is configured.
    pub fn limiter(&self) -> Option<&Arc<TokenBucketLimiter>> {
        self.limiter.as_ref()
    }

    /// The result pipeline, if one is configured.
    pub fn sanitizer(&self) -> Option<&SanitizationPipeline> {
        self.sanitizer.as_ref()
    }

    /// The key this orchestrator would use for `identity` calling `tool_name`.
    pub fn caller_key(&self, identity: &CallerIdentity, tool_name: &str) -> CallerKey {
        self.key_strategy.derive(identity, tool_name)
    }
}

/// Per-call state and audit emission.
///
/// Dropping a call that has not reached a terminal state records a
/// `Cancelled` event, which covers futures dropped mid-execution.
struct CallLifecycle<'a> {
    sink: &'a dyn AuditSink,
    call_id: Uuid,
    tool_name: &'a str,
    caller_key: CallerKey,
    identity: Option<&'a CallerIdentity>,
    args: Value,
    state: CallState,
    executing_since: Option<Instant>,
}

impl<'a> CallLifecycle<'a> {
    fn new(
        sink: &'a dyn AuditSink,
        tool_name: &'a str,
        caller_key: CallerKey,
        identity: Option<&'a CallerIdentity>,
        args: Value,
    ) -> Self {
        Self {
            sink,
            call_id: Uuid::new_v4(),
            tool_name,
            caller_key,
            identity,
            args,
            state: CallState::Received,
            executing_since: None,
        }
    }

    fn advance(&mut self, next: CallState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(call_id = %self.call_id, from = %self.state, to = %next, "Call state change");
        if next == CallState::Executing {
            self.executing_since = Some(Instant::now());
        }
        self.state = next;
    }

    fn fail(&mut self, reason: FailureReason, decorate: impl FnOnce(AuditEvent) -> AuditEvent) {
        let outcome = match reason {
            FailureReason::AccessDenied => AuditOutcome::AccessDenied,
            FailureReason::RateLimited => AuditOutcome::RateLimited,
            FailureReason::ExecutionFailed => AuditOutcome::ExecutionFailed,
            FailureReason::Cancelled => AuditOutcome::Cancelled,
        };
        self.emit(outcome, decorate);
        self.advance(CallState::Failed(reason));
    }

    fn emit(&self, outcome: AuditOutcome, decorate: impl FnOnce(AuditEvent) -> AuditEvent) {
        let mut event = AuditEvent::new(
            self.call_id,
            self.tool_name,
            self.caller_key.clone(),
            self.args.clone(),
            outcome,
        );
        if let Some(identity) = self.identity {
            event = event.with_identity(identity);
        }
        if let (true, Some(since)) = (outcome.is_terminal(), self.executing_since) {
            event = event.with_duration(since.elapsed());
        }
        let event = decorate(event);

        if let Err(err) = self.sink.record(&event) {
            warn!(
                call_id = %self.call_id,
                outcome = outcome.as_str(),
                error = %err,
                "Audit sink failed; continuing"
            );
        }
    }
}

impl Drop for CallLifecycle<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            warn!(call_id = %self.call_id, state = %self.state, "Call dropped before completion");
            self.fail(FailureReason::Cancelled, |event| {
                event.with_error("call cancelled before completion")
            });
        }
    }
}

/// Builder for [`CallOrchestrator`].
///
/// Defaults: deny every tool, no rate limit, no sanitization, audit through
/// `tracing`, `user:session` caller keys.
pub struct CallOrchestratorBuilder {
    policy: AccessPolicy,
    limiter: Option<Arc<TokenBucketLimiter>>,
    sanitizer: Option<SanitizationPipeline>,
    audit: Arc<dyn AuditSink>,
    key_strategy: Box<dyn CallerKeyStrategy>,
}

impl Default for CallOrchestratorBuilder {
    fn default() -> Self {
        Self {
            policy: AccessPolicy::deny_all(),
            limiter: None,
            sanitizer: None,
            audit: Arc::new(TracingAuditSink::default()),
            key_strategy: Box::new(KeyStrategy::default()),
        }
    }
}

impl CallOrchestratorBuilder {
    /// Replace the whitelist.
    pub fn access_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the whitelist with `tools`.
    pub fn allow_tools<I, S>(self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access_policy(AccessPolicy::new(tools))
    }

    /// Give this orchestrator its own limiter.
    pub fn rate_limit(self, config: RateLimitConfig) -> Self {
        self.limiter(Arc::new(TokenBucketLimiter::new(config)))
    }

    /// Use an existing, possibly shared, limiter.
    pub fn limiter(mut self, limiter: Arc<TokenBucketLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Sanitize textual results with `pipeline`.
    pub fn sanitizer(mut self, pipeline: SanitizationPipeline) -> Self {
        self.sanitizer = Some(pipeline);
        self
    }

    /// Send audit events to `sink`.
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Derive caller keys with `strategy`.
    pub fn key_strategy(mut self, strategy: impl CallerKeyStrategy + 'static) -> Self {
        self.key_strategy = Box::new(strategy);
        self
    }

    /// Finish the orchestrator.
    pub fn build(self) -> CallOrchestrator {
        CallOrchestrator {
            access: AccessGate::new(self.policy),
            limiter: self.limiter,
            sanitizer: self.sanitizer,
            audit: self.audit,
            key_strategy: self.key_strategy,
        }
    }
}
