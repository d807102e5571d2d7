use crash_engine::engine::multiplier_at;
use crash_engine::fairness::{crash_point_from_secret, hash_secret, RoundCommitment};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn bench_derivation(c: &mut Criterion) {
    let secret = [42u8; 32];

    c.bench_function("crash_point_from_secret", |b| {
        b.iter(|| crash_point_from_secret(black_box(&secret), 25))
    });
    c.bench_function("hash_secret", |b| b.iter(|| hash_secret(black_box(&secret))));
    c.bench_function("commitment_generate", |b| b.iter(|| RoundCommitment::generate(25)));
}

fn bench_tick(c: &mut Criterion) {
    c.bench_function("multiplier_at", |b| {
        b.iter(|| multiplier_at(black_box(1.06), black_box(Duration::from_millis(12_345))))
    });
}

criterion_group!(benches, bench_derivation, bench_tick);
criterion_main!(benches);
