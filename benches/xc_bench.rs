use cairn::core::agent::CachingAgent;
use cairn::core::cipher::xc::KdfParams;
use cairn::core::cipher::{Crypto, Keyring, Xc};
use cairn::Options;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::RngCore;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

/// Keyring holding one unlocked key.
fn setup() -> (Xc, String) {
    let xc = Xc::in_memory(
        Arc::new(CachingAgent::fixed("bench")),
        KdfParams::insecure_fast(),
    );
    let fp = xc
        .create_private_key(
            &Options::default(),
            "bench",
            "bench@example.com",
            &SecretString::from("bench".to_string()),
        )
        .unwrap();
    (xc, fp)
}

/// Random bytes; incompressible, so every chunk is sealed as-is.
fn generate_payload(size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; size];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// Benchmark encrypt/decrypt roundtrip with varying payload sizes.
fn bench_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("xc_roundtrip");
    group.sample_size(30);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    let (xc, fp) = setup();
    let opts = Options::default();
    let recipients = vec![fp];

    for size in [32, 1024, 16384, 163840] {
        let payload = generate_payload(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("roundtrip", format!("{size}B")),
            &payload,
            |b, payload| {
                b.iter(|| {
                    let ct = xc
                        .encrypt(&opts, black_box(payload), black_box(&recipients))
                        .unwrap();
                    black_box(xc.decrypt(&opts, &ct).unwrap());
                });
            },
        );
    }
    group.finish();
}

/// Benchmark encryption with a growing recipient list.
fn bench_recipients(c: &mut Criterion) {
    let mut group = c.benchmark_group("xc_recipients");
    group.sample_size(30);

    let (xc, first) = setup();
    let opts = Options::default();
    let mut recipients = vec![first];
    for i in 1..16 {
        let other = Xc::in_memory(
            Arc::new(CachingAgent::fixed("bench")),
            KdfParams::insecure_fast(),
        );
        let fp = other
            .create_private_key(
                &opts,
                &format!("r{i}"),
                &format!("r{i}@example.com"),
                &SecretString::from("bench".to_string()),
            )
            .unwrap();
        xc.import_public_key(&opts, &other.export_public_key(&opts, &fp).unwrap())
            .unwrap();
        recipients.push(fp);
    }

    let payload = generate_payload(1024);
    for n in [1, 4, 16] {
        group.bench_with_input(BenchmarkId::new("encrypt", n), &n, |b, &n| {
            b.iter(|| {
                black_box(
                    xc.encrypt(&opts, black_box(&payload), &recipients[..n])
                        .unwrap(),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_roundtrip, bench_recipients);
criterion_main!(benches);
