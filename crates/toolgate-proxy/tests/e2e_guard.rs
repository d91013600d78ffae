#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end tests for CallOrchestrator: gates, sanitization, audit trail,
//! cancellation, and concurrent callers.

use serde_json::{json, Value};
use std::error::Error as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::{CallerIdentity, CallerKey, ToolError, ToolgateError};
use toolgate_proxy::{CallOrchestrator, KeyStrategy, Tool};
use toolgate_security::{
    AuditOutcome, ChannelAuditSink, ManualClock, MemoryAuditSink, RateLimitConfig,
    SanitizationPipeline, TokenBucketLimiter,
};

fn frozen_limiter(rpm: f64, burst: u32) -> Arc<TokenBucketLimiter> {
    Arc::new(TokenBucketLimiter::with_clock(
        RateLimitConfig::new(rpm, burst).unwrap(),
        Arc::new(ManualClock::default()),
    ))
}

async fn ok_tool(_args: Value) -> Result<Value, ToolError> {
    Ok(json!({"hits": 3}))
}

// --- Scenario: access denied ---

#[tokio::test]
async fn test_unlisted_tool_never_runs() {
    let sink = Arc::new(MemoryAuditSink::new());
    let guard = CallOrchestrator::builder()
        .allow_tools(["search"])
        .audit_sink(sink.clone())
        .build();
    let ran = AtomicUsize::new(0);

    let err = guard
        .invoke("write_file", json!({"path": "/tmp/x"}), &CallerKey::from("u1"), |_| async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ToolError>(Value::Null)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ToolgateError::AccessDenied { ref tool_name } if tool_name == "write_file"));
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, AuditOutcome::AccessDenied);
    assert_eq!(events[0].tool_name, "write_file");
    assert_eq!(events[0].args["path"], "/tmp/x");
}

// --- Scenario: rate limited ---

#[tokio::test]
async fn test_third_rapid_call_is_rate_limited() {
    let sink = Arc::new(MemoryAuditSink::new());
    let guard = CallOrchestrator::builder()
        .allow_tools(["search"])
        .limiter(frozen_limiter(60.0, 2))
        .audit_sink(sink.clone())
        .build();
    let key = CallerKey::from("u1");

    assert!(guard.invoke("search", Value::Null, &key, ok_tool).await.is_ok());
    assert!(guard.invoke("search", Value::Null, &key, ok_tool).await.is_ok());
    let err = guard
        .invoke("search", Value::Null, &key, ok_tool)
        .await
        .unwrap_err();

    assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
    match err {
        ToolgateError::RateLimited { caller_key, .. } => assert_eq!(caller_key, key),
        other => panic!("expected RateLimited, got {other:?}"),
    }

    let last = sink.events().pop().unwrap();
    assert_eq!(last.outcome, AuditOutcome::RateLimited);
    assert_eq!(last.retry_after_ms, Some(1000));
}

#[tokio::test]
async fn test_limited_caller_does_not_affect_others() {
    let guard = CallOrchestrator::builder()
        .allow_tools(["search"])
        .limiter(frozen_limiter(60.0, 1))
        .audit_sink(Arc::new(MemoryAuditSink::new()))
        .build();

    let a = CallerKey::from("a");
    let b = CallerKey::from("b");
    assert!(guard.invoke("search", Value::Null, &a, ok_tool).await.is_ok());
    assert!(guard.invoke("search", Value::Null, &a, ok_tool).await.is_err());
    assert!(guard.invoke("search", Value::Null, &b, ok_tool).await.is_ok());
}

// --- Scenario: sanitization ---

#[tokio::test]
async fn test_card_number_redacted_and_truncated() {
    let sink = Arc::new(MemoryAuditSink::new());
    let guard = CallOrchestrator::builder()
        .allow_tools(["lookup"])
        .sanitizer(
            SanitizationPipeline::builder()
                .redact(r"\b\d{16}\b")
                .max_length(20)
                .truncation_marker("")
                .build()
                .unwrap(),
        )
        .audit_sink(sink.clone())
        .build();

    let out = guard
        .invoke("lookup", Value::Null, &CallerKey::from("u1"), |_| async {
            Ok::<_, ToolError>(Value::String("card 1234567812345678 extra".into()))
        })
        .await
        .unwrap();

    assert_eq!(out, Value::String("card [REDACTED] extr".into()));
    assert_eq!(
        sink.outcomes(),
        vec![
            AuditOutcome::Started,
            AuditOutcome::Sanitized,
            AuditOutcome::Completed
        ]
    );
}

// --- Failures and audit robustness ---

#[derive(Debug)]
struct Boom;

impl std::fmt::Display for Boom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "boom")
    }
}

impl std::error::Error for Boom {}

#[tokio::test]
async fn test_tool_error_is_preserved() {
    let sink = Arc::new(MemoryAuditSink::new());
    let guard = CallOrchestrator::builder()
        .allow_tools(["search"])
        .audit_sink(sink.clone())
        .build();

    let err = guard
        .invoke("search", Value::Null, &CallerKey::from("u1"), |_| async {
            Err::<Value, _>(Boom)
        })
        .await
        .unwrap_err();

    let source = err.source().unwrap();
    assert!(source.downcast_ref::<Boom>().is_some());
    let original = err.into_tool_error().unwrap();
    assert_eq!(original.to_string(), "boom");

    let events = sink.events();
    assert_eq!(
        events.iter().map(|e| e.outcome).collect::<Vec<_>>(),
        vec![AuditOutcome::Started, AuditOutcome::ExecutionFailed]
    );
    assert_eq!(events[1].error.as_deref(), Some("boom"));
    assert!(events[1].duration_ms.is_some());
}

#[tokio::test]
async fn test_failing_sink_does_not_mask_result() {
    let (sink, rx) = ChannelAuditSink::new();
    drop(rx);
    let guard = CallOrchestrator::builder()
        .allow_tools(["search"])
        .audit_sink(Arc::new(sink))
        .build();

    let out = guard
        .invoke("search", Value::Null, &CallerKey::from("u1"), ok_tool)
        .await
        .unwrap();
    assert_eq!(out["hits"], 3);

    let err = guard
        .invoke("delete", Value::Null, &CallerKey::from("u1"), ok_tool)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolgateError::AccessDenied { .. }));
}

#[tokio::test]
async fn test_channel_sink_receives_events_in_order() {
    let (sink, mut rx) = ChannelAuditSink::new();
    let guard = CallOrchestrator::builder()
        .allow_tools(["search"])
        .audit_sink(Arc::new(sink))
        .build();

    guard
        .invoke("search", Value::Null, &CallerKey::from("u1"), ok_tool)
        .await
        .unwrap();

    assert_eq!(rx.recv().await.unwrap().outcome, AuditOutcome::Started);
    assert_eq!(rx.recv().await.unwrap().outcome, AuditOutcome::Completed);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_dropped_call_is_audited_as_cancelled() {
    let sink = Arc::new(MemoryAuditSink::new());
    let guard = CallOrchestrator::builder()
        .allow_tools(["slow"])
        .audit_sink(sink.clone())
        .build();

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        guard.invoke("slow", Value::Null, &CallerKey::from("u1"), |_| {
            std::future::pending::<Result<Value, ToolError>>()
        }),
    )
    .await;

    assert!(result.is_err());
    let events = sink.events();
    assert_eq!(
        events.iter().map(|e| e.outcome).collect::<Vec<_>>(),
        vec![AuditOutcome::Started, AuditOutcome::Cancelled]
    );
    assert_eq!(events[0].call_id, events[1].call_id);
}

// --- Identity and tools ---

struct Echo;

#[async_trait::async_trait]
impl Tool for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        Ok(arguments["text"].clone())
    }
}

#[tokio::test]
async fn test_invoke_tool_with_user_keys() {
    let sink = Arc::new(MemoryAuditSink::new());
    let limiter = frozen_limiter(60.0, 1);
    let guard = CallOrchestrator::builder()
        .allow_tools(["echo"])
        .limiter(limiter.clone())
        .key_strategy(KeyStrategy::User)
        .sanitizer(SanitizationPipeline::builder().html_escape().build().unwrap())
        .audit_sink(sink.clone())
        .build();

    let s1 = CallerIdentity::new("alice", "s1");
    let s2 = CallerIdentity::new("alice", "s2");

    let out = guard
        .invoke_tool(&Echo, json!({"text": "<b>"}), &s1)
        .await
        .unwrap();
    assert_eq!(out, Value::String("&lt;b&gt;".into()));

    // Same user, different session: one shared bucket.
    let err = guard
        .invoke_tool(&Echo, json!({"text": "x"}), &s2)
        .await
        .unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(limiter.len(), 1);

    let last = sink.events().pop().unwrap();
    assert_eq!(last.caller_key.as_str(), "alice");
    assert_eq!(last.session_id.as_deref(), Some("s2"));
}

#[tokio::test]
async fn test_custom_key_closure() {
    let limiter = frozen_limiter(60.0, 1);
    let guard = CallOrchestrator::builder()
        .allow_tools(["echo"])
        .limiter(limiter.clone())
        .key_strategy(|_: &CallerIdentity, tool: &str| CallerKey::new(format!("global:{tool}")))
        .audit_sink(Arc::new(MemoryAuditSink::new()))
        .build();

    let key = guard.caller_key(&CallerIdentity::user("bob"), "echo");
    assert_eq!(key.as_str(), "global:echo");

    guard
        .invoke_tool(&Echo, json!({"text": "x"}), &CallerIdentity::user("bob"))
        .await
        .unwrap();
    assert_eq!(limiter.available_tokens(&key), 0.0);
}

// --- Concurrency ---

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_bounded_by_burst() {
    const BURST: u32 = 5;
    let sink = Arc::new(MemoryAuditSink::with_capacity(1000));
    let guard = Arc::new(
        CallOrchestrator::builder()
            .allow_tools(["search"])
            .limiter(frozen_limiter(60.0, BURST))
            .audit_sink(sink.clone())
            .build(),
    );

    let mut handles = Vec::new();
    for _ in 0..32 {
        let guard = guard.clone();
        handles.push(tokio::spawn(async move {
            guard
                .invoke("search", Value::Null, &CallerKey::from("shared"), ok_tool)
                .await
                .is_ok()
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, BURST as usize);
    let outcomes = sink.outcomes();
    let limited = outcomes
        .iter()
        .filter(|o| **o == AuditOutcome::RateLimited)
        .count();
    assert_eq!(limited, 32 - BURST as usize);
}
