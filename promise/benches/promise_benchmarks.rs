use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use redlilium_promise::{
    CancelationSource, CancelationToken, FramePhase, FrameScheduler, PromiseRuntime, WaitOneTick,
    WaitTicks,
};

// ---------------------------------------------------------------------------
// Deferred / Promise
// ---------------------------------------------------------------------------

fn bench_deferred_resolve_1k(c: &mut Criterion) {
    let runtime = PromiseRuntime::new();
    c.bench_function("deferred_resolve_1k", |b| {
        b.iter(|| {
            for i in 0..1_000u32 {
                let (deferred, promise) = runtime.deferred::<u32>();
                deferred.try_resolve(i);
                black_box(promise.into_outcome().ok());
            }
        });
    });
}

fn bench_then_chain_100(c: &mut Criterion) {
    let runtime = PromiseRuntime::new();
    c.bench_function("then_chain_100", |b| {
        b.iter(|| {
            let (deferred, promise) = runtime.deferred::<u64>();
            let mut tail = promise;
            for _ in 0..100 {
                tail = tail.then(|value| value + 1);
            }
            deferred.try_resolve(0);
            black_box(tail.into_outcome().ok());
        });
    });
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

fn bench_race_pending_16(c: &mut Criterion) {
    let runtime = PromiseRuntime::new();
    c.bench_function("race_pending_16", |b| {
        b.iter(|| {
            let (deferreds, promises): (Vec<_>, Vec<_>) =
                (0..16).map(|_| runtime.deferred::<u32>()).unzip();
            let race = runtime.race(promises).unwrap();
            deferreds[7].try_resolve(7);
            black_box(race.into_outcome().ok());
        });
    });
}

fn bench_all_pending_256(c: &mut Criterion) {
    let runtime = PromiseRuntime::new();
    c.bench_function("all_pending_256", |b| {
        b.iter(|| {
            let (deferreds, promises): (Vec<_>, Vec<_>) =
                (0..256).map(|_| runtime.deferred::<u32>()).unzip();
            let all = runtime.all(promises);
            for (i, deferred) in deferreds.iter().enumerate() {
                deferred.try_resolve(i as u32);
            }
            black_box(all.into_outcome().ok());
        });
    });
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

fn bench_tick_10k_instructions(c: &mut Criterion) {
    c.bench_function("tick_10k_wait_ticks", |b| {
        b.iter_batched(
            || {
                let mut scheduler = FrameScheduler::new(PromiseRuntime::new());
                for _ in 0..10_000 {
                    scheduler
                        .wait_for(FramePhase::Update, WaitTicks(u32::MAX))
                        .unwrap();
                }
                scheduler
            },
            |mut scheduler| {
                black_box(scheduler.on_update_tick().unwrap());
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_runner_cancel_1k(c: &mut Criterion) {
    c.bench_function("runner_cancel_half_1k", |b| {
        b.iter_batched(
            || {
                let mut scheduler = FrameScheduler::new(PromiseRuntime::new());
                let sources: Vec<_> = (0..1_000).map(|_| CancelationSource::new()).collect();
                let promises: Vec<_> = sources
                    .iter()
                    .map(|source| {
                        scheduler
                            .wait_for_promise(FramePhase::Update, WaitOneTick, &source.token())
                            .unwrap()
                    })
                    .collect();
                (scheduler, sources, promises)
            },
            |(mut scheduler, sources, promises)| {
                for source in sources.iter().step_by(2) {
                    source.cancel();
                }
                scheduler.on_update_tick().unwrap();
                black_box(promises);
            },
            BatchSize::LargeInput,
        );
    });
}

fn bench_sequence_16(c: &mut Criterion) {
    let runtime = PromiseRuntime::new();
    c.bench_function("sequence_resolved_16", |b| {
        b.iter(|| {
            let steps: Vec<_> = (0..16)
                .map(|_| {
                    let runtime = runtime.clone();
                    move || runtime.resolved(())
                })
                .collect();
            let sequence = runtime.sequence(&CancelationToken::none(), steps);
            black_box(sequence.into_outcome().ok());
        });
    });
}

criterion_group!(
    benches,
    bench_deferred_resolve_1k,
    bench_then_chain_100,
    bench_race_pending_16,
    bench_all_pending_256,
    bench_tick_10k_instructions,
    bench_runner_cancel_1k,
    bench_sequence_16,
);
criterion_main!(benches);
