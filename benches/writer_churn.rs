use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use swmr_rcu::{RcuDomain, RcuMap, RcuVec};

fn manual_domain() -> RcuDomain {
    RcuDomain::builder().purge_period(None).build().unwrap()
}

/// Benchmark: retire N objects, then reclaim them with one purge.
fn bench_retire_and_purge(c: &mut Criterion) {
    let mut group = c.benchmark_group("retire_and_purge");

    for count in [10usize, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("swmr_rcu", count), count, |b, &count| {
            let domain = manual_domain();
            let _attachment = domain.attach();

            b.iter(|| {
                for i in 0..count {
                    domain.free_object(Box::new(i as u64));
                }
                black_box(domain.purge())
            });
        });

        group.bench_with_input(
            BenchmarkId::new("crossbeam_epoch", count),
            count,
            |b, &count| {
                b.iter(|| {
                    let guard = crossbeam_epoch::pin();
                    for i in 0..count {
                        let owned = crossbeam_epoch::Owned::new(i as u64).into_shared(&guard);
                        // SAFETY: the pointer was never published.
                        unsafe { guard.defer_destroy(owned) };
                    }
                    guard.flush();
                });
            },
        );
    }

    group.finish();
}

/// Benchmark: map insert/erase churn with readers scanning concurrently.
fn bench_map_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_churn");

    for num_readers in [0usize, 2, 4].iter() {
        group.bench_with_input(
            BenchmarkId::new("readers", num_readers),
            num_readers,
            |b, &num_readers| {
                let domain = RcuDomain::new().unwrap();
                let map = Arc::new(RcuMap::new(&domain));
                let stop = Arc::new(AtomicBool::new(false));

                let readers: Vec<_> = (0..num_readers)
                    .map(|_| {
                        let domain = domain.clone();
                        let map = Arc::clone(&map);
                        let stop = Arc::clone(&stop);
                        thread::spawn(move || {
                            let _attachment = domain.attach();
                            while !stop.load(Ordering::Relaxed) {
                                let guard = domain.enter();
                                black_box(map.iter(&guard).count());
                            }
                        })
                    })
                    .collect();

                b.iter(|| {
                    for i in 0..256u32 {
                        map.insert(i, i);
                    }
                    for i in 0..256u32 {
                        map.erase(&i);
                    }
                });

                stop.store(true, Ordering::Relaxed);
                for reader in readers {
                    let _ = reader.join();
                }
            },
        );
    }

    group.finish();
}

/// Benchmark: appends that stay in place against appends that force reallocation.
fn bench_vector_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_growth");

    group.bench_function("push_back_from_empty", |b| {
        let domain = manual_domain();
        b.iter(|| {
            let values = RcuVec::new(&domain);
            for i in 0..1024u64 {
                values.push_back(i);
            }
            black_box(values.len());
            drop(values);
            domain.purge();
        });
    });

    group.bench_function("push_back_reserved", |b| {
        let domain = manual_domain();
        b.iter(|| {
            let values = RcuVec::with_capacity(&domain, 1024);
            for i in 0..1024u64 {
                values.push_back(i);
            }
            black_box(values.len());
        });
    });

    group.bench_function("pop_then_push", |b| {
        let domain = manual_domain();
        let values = RcuVec::from_elem(&domain, 64, 0u64);
        b.iter(|| {
            values.pop_back();
            values.push_back(0);
            domain.purge();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_retire_and_purge, bench_map_churn, bench_vector_growth);
criterion_main!(benches);
