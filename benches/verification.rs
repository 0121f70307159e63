//! Performance benchmarks for the gate hot paths.
//!
//! Run with: `cargo bench --bench verification`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Cold tag check | <50µs p99 | Full HMAC computation |
//! | Cached tag check | <5µs p99 | LRU cache hit |
//! | Cache contention | Linear scaling | Multi-threaded access |
//! | Rule selection | <20µs p99 | Built-in rule set |
//! | Route resolution | <10µs p99 | Full catalog, primary and legacy |

use criterion::{
    black_box, criterion_group, criterion_main,
    BenchmarkId, Criterion, Throughput,
};
use std::sync::Arc;
use std::thread;

use ispyb_gate::registry::Resolution;
use ispyb_gate::resources::register_catalog;
use ispyb_gate::{
    BearerToken, CacheConfig, CredentialVerifier, InMemoryIdentityStore, InMemoryResourceBackend,
    Principal, RouteRegistry, RuleSet, SubjectGrants, SubjectId, Verb,
    VerifierConfig,
};

const SECRET: &[u8] = b"benchmark_secret_32_bytes_min___";

fn verifier(cache: CacheConfig) -> CredentialVerifier {
    CredentialVerifier::new(
        Arc::new(InMemoryIdentityStore::new()),
        SECRET.to_vec(),
        VerifierConfig {
            cache,
            ..VerifierConfig::default()
        },
    )
}

fn disabled() -> CacheConfig {
    CacheConfig {
        max_entries: 1,
        enabled: false,
    }
}

/// Benchmark cold tag checks (no cache).
fn bench_cold_tag_check(c: &mut Criterion) {
    let verifier = verifier(disabled());
    let token = BearerToken::mint(SECRET);

    c.bench_function("cold_tag_check", |b| {
        b.iter(|| {
            let result = verifier.check_tag(black_box(&token));
            assert!(result.is_valid);
            result
        })
    });
}

/// Benchmark cached tag checks (cache hit).
fn bench_cached_tag_check(c: &mut Criterion) {
    let verifier = verifier(CacheConfig::default());
    let token = BearerToken::mint(SECRET);

    // Warm the cache
    let warmup = verifier.check_tag(&token);
    assert!(warmup.is_valid);
    assert!(!warmup.cache_hit);

    c.bench_function("cached_tag_check", |b| {
        b.iter(|| {
            let result = verifier.check_tag(black_box(&token));
            assert!(result.cache_hit);
            result
        })
    });
}

/// Benchmark cache miss scenario (new entries).
fn bench_cache_miss(c: &mut Criterion) {
    let verifier = verifier(CacheConfig {
        max_entries: 100_000,
        enabled: true,
    });
    let tokens: Vec<_> = (0..1000).map(|_| BearerToken::mint(SECRET)).collect();

    c.bench_function("cache_miss", |b| {
        let mut idx = 0;
        b.iter(|| {
            let token = &tokens[idx % tokens.len()];
            idx += 1;
            verifier.check_tag(black_box(token))
        })
    });
}

/// Benchmark multi-threaded cache access.
fn bench_cache_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_contention");

    for num_threads in [1, 2, 4, 8] {
        let verifier = Arc::new(verifier(CacheConfig::default()));
        let tokens: Vec<_> = (0..num_threads).map(|_| BearerToken::mint(SECRET)).collect();
        for token in &tokens {
            verifier.check_tag(token);
        }

        group.throughput(Throughput::Elements(num_threads as u64));
        group.bench_with_input(
            BenchmarkId::new("threads", num_threads),
            &num_threads,
            |b, &n| {
                b.iter(|| {
                    let handles: Vec<_> = (0..n)
                        .map(|i| {
                            let v = Arc::clone(&verifier);
                            let t = tokens[i].clone();
                            thread::spawn(move || {
                                for _ in 0..100 {
                                    assert!(v.check_tag(black_box(&t)).is_valid);
                                }
                            })
                        })
                        .collect();

                    for h in handles {
                        h.join().unwrap();
                    }
                })
            },
        );
    }

    group.finish();
}

/// Benchmark rule selection against the built-in rule set.
fn bench_rule_selection(c: &mut Criterion) {
    let rules = RuleSet::builtin().unwrap();
    let resolver = ispyb_gate::policy::ParamOwnerResolver;
    let reader = Principal::authenticated(
        SubjectId::new("1"),
        SubjectGrants::with_roles("reader", ["reader"]),
    );

    let mut group = c.benchmark_group("rule_selection");
    for (path, verb) in [
        ("/samples", Verb::Get),
        ("/samples/crystals/42", Verb::Delete),
        ("/contacts/persons/reader/info", Verb::Get),
        ("/unknown/path", Verb::Get),
    ] {
        group.bench_with_input(BenchmarkId::new("path", path), &(path, verb), |b, &(path, verb)| {
            b.iter(|| rules.decide(black_box(&reader), black_box(path), verb, &resolver))
        });
    }
    group.finish();
}

/// Benchmark route resolution on the full catalog.
fn bench_route_resolution(c: &mut Criterion) {
    let mut registry = RouteRegistry::with_legacy_prefix("/legacy").unwrap();
    register_catalog(&mut registry, Arc::new(InMemoryResourceBackend::new())).unwrap();
    let table = registry.seal();

    let mut group = c.benchmark_group("route_resolution");
    for path in ["/samples/42", "/legacy/contacts/lab_contacts/7", "/phasing"] {
        group.bench_with_input(BenchmarkId::new("path", path), &path, |b, &path| {
            b.iter(|| {
                let found = matches!(table.resolve(Verb::Get, black_box(path)), Resolution::Found(_));
                assert!(found);
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_cold_tag_check,
    bench_cached_tag_check,
    bench_cache_miss,
    bench_cache_contention,
    bench_rule_selection,
    bench_route_resolution,
);
criterion_main!(benches);
