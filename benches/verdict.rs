//! Performance benchmarks for a3s-linkguard
//!
//! Run with: cargo bench

use a3s_linkguard::{
    normalize, Classification, Dispatcher, GuardConfig, ManualClock, MemoryThreatSource,
    TabId, Verdict, VerdictCache, VerdictRequest,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize (plain)", |b| {
        b.iter(|| normalize("https://safe-bank.example/login", None).unwrap());
    });

    c.bench_function("normalize (tracking params)", |b| {
        b.iter(|| {
            normalize(
                "HTTPS://Shop.EXAMPLE:443/item?utm_source=mail&id=42&fbclid=abc&gclid=x#reviews",
                None,
            )
            .unwrap()
        });
    });

    let base = url::Url::parse("https://mail.google.com/mail/u/0/#inbox").unwrap();
    c.bench_function("normalize (relative)", |b| {
        b.iter(|| normalize("../redirect?to=1&utm_medium=email", Some(&base)).unwrap());
    });
}

fn bench_cache(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let urls: Vec<_> = (0..1000)
        .map(|i| normalize(&format!("https://host-{}.example/path", i), None).unwrap())
        .collect();

    let mut cache = VerdictCache::new(1000, clock.clone());
    for url in &urls {
        cache.put(
            url.clone(),
            Verdict::live(url.clone(), Classification::Safe, None, 0, 60_000),
        );
    }

    c.bench_function("cache get (hit)", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % urls.len();
            cache.get(&urls[i]).unwrap()
        });
    });

    let mut group = c.benchmark_group("cache_put_with_eviction");
    for capacity in [100, 1000] {
        group.bench_function(format!("capacity {}", capacity), |b| {
            let mut cache = VerdictCache::new(capacity, clock.clone());
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % urls.len();
                let url = urls[i].clone();
                let verdict = Verdict::live(url.clone(), Classification::Safe, None, 0, 60_000);
                cache.put(url, verdict);
            });
        });
    }
    group.finish();
}

fn bench_dispatcher(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dispatcher = rt.block_on(async {
        Dispatcher::start(&GuardConfig::default(), Arc::new(MemoryThreatSource::new())).unwrap()
    });
    let url = normalize("https://safe-bank.example/login", None).unwrap();
    rt.block_on(dispatcher.submit(VerdictRequest::new(url.clone(), TabId(1))))
        .unwrap();

    c.bench_function("dispatcher submit (cache hit)", |b| {
        b.to_async(&rt).iter(|| async {
            dispatcher
                .submit(VerdictRequest::new(url.clone(), TabId(1)))
                .await
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_normalize, bench_cache, bench_dispatcher);
criterion_main!(benches);
