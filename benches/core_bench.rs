//! Benchmarks for core qsc operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use qsc_core::{
    amplify::ToeplitzHash,
    cascade::{self, CascadeParams},
    channel::SymmetricChannel,
    config::SessionConfig,
    rng::RandomSource,
    session,
    util,
};

fn bench_session(c: &mut Criterion) {
    let cfg = SessionConfig {
        seed: Some(42),
        ..SessionConfig::default()
    };
    c.bench_function("run_session_4096", |b| {
        b.iter(|| session::run_session(black_box(&cfg)).unwrap())
    });
}

fn bench_cascade(c: &mut Criterion) {
    let mut rng = RandomSource::seeded(7);
    let reference = rng.bits(2048);
    let mut noisy = reference.clone();
    for b in noisy.iter_mut() {
        if rng.chance(0.03) {
            *b ^= 1;
        }
    }
    let params = CascadeParams::default();
    c.bench_function("cascade_2048_3pct", |b| {
        b.iter(|| {
            let mut work = noisy.clone();
            let mut rng = RandomSource::seeded(8);
            cascade::reconcile(&reference, &mut work, black_box(&params), &mut rng).unwrap()
        })
    });
}

fn bench_toeplitz(c: &mut Criterion) {
    let mut rng = RandomSource::seeded(9);
    let hash = ToeplitzHash::random(2048, 256, &mut rng).unwrap();
    let input = rng.bits(2048);
    c.bench_function("toeplitz_2048_to_256", |b| {
        b.iter(|| hash.hash(black_box(&input)).unwrap())
    });
}

fn bench_channel(c: &mut Criterion) {
    let gcm = SymmetricChannel::new(&[7u8; 32]).unwrap();
    let cbc = SymmetricChannel::legacy_cbc(&[7u8; 32]).unwrap();
    let data = vec![0u8; 1024];
    c.bench_function("aes256_gcm_encrypt_1kb", |b| {
        b.iter(|| gcm.encrypt(black_box(&data)).unwrap())
    });
    c.bench_function("aes256_cbc_encrypt_1kb", |b| {
        b.iter(|| cbc.encrypt(black_box(&data)).unwrap())
    });
}

fn bench_sha256(c: &mut Criterion) {
    let data = vec![0u8; 1024];
    c.bench_function("sha256_1kb", |b| {
        b.iter(|| util::sha256(black_box(&data)))
    });
}

criterion_group!(
    benches,
    bench_session,
    bench_cascade,
    bench_toeplitz,
    bench_channel,
    bench_sha256
);
criterion_main!(benches);
