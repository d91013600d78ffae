//! Hot-path benchmarks for the limiter, the access gate, and sanitization.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use toolgate_core::CallerKey;
use toolgate_security::{
    AccessGate, AccessPolicy, RateLimitConfig, SanitizationPipeline, TokenBucketLimiter,
};

fn bench_limiter(c: &mut Criterion) {
    let config = RateLimitConfig::new(1e9, u32::MAX).unwrap_or_else(|e| panic!("{e}"));
    let limiter = TokenBucketLimiter::new(config);
    let keys: Vec<CallerKey> = (0..64)
        .map(|i| CallerKey::from(format!("user-{i}")))
        .collect();

    c.bench_function("try_acquire_hot_key", |b| {
        b.iter(|| limiter.try_acquire(black_box(&keys[0])));
    });

    let mut idx = 0usize;
    c.bench_function("try_acquire_spread_keys", |b| {
        b.iter(|| {
            idx = (idx + 1) % keys.len();
            limiter.try_acquire(black_box(&keys[idx]))
        });
    });
}

fn bench_gates(c: &mut Criterion) {
    let gate = AccessGate::new(AccessPolicy::new(["search", "read", "list", "write"]));
    c.bench_function("access_check", |b| {
        b.iter(|| gate.check(black_box("list")));
    });

    let pipeline = SanitizationPipeline::builder()
        .redact(r"\b\d{16}\b")
        .redact(r"sk-[A-Za-z0-9]{20,}")
        .max_length(1000)
        .build()
        .unwrap_or_else(|e| panic!("{e}"));
    let text = "order for card 1234567812345678 placed with key sk-aaaaaaaaaaaaaaaaaaaaaaaa "
        .repeat(8);
    c.bench_function("sanitize_800b", |b| {
        b.iter(|| pipeline.apply(black_box(&text)));
    });
}

criterion_group!(benches, bench_limiter, bench_gates);
criterion_main!(benches);
