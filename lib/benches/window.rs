use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_batch_windows::*;

fn outcome(job: JobNumber) -> JobOutcome {
    if job % 17 == 0 {
        JobOutcome::failed(job, ErrorCategory::SchedulingFailure)
    } else {
        JobOutcome::succeeded(job)
    }
}

pub fn window_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("window");

    group.bench_function("counter set/record", |b| {
        let counters = CounterSet::new();
        let mut job = 0;
        b.iter(|| {
            job += 1;
            counters.record(&outcome(job));
        });
    });

    // No span processor: measures the controller, not an exporter.
    let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
    let config = AggregatorConfig::default().with_max_jobs_per_window(100);

    group.bench_function("controller/100 jobs per window", |b| {
        let mut controller = WindowController::new(
            provider.tracer("bench"),
            &config,
            Arc::new(LinkRegistry::new()),
        );
        let mut job = 1;
        b.iter(|| {
            let now = Instant::now();
            if controller.should_rotate(job, now) {
                let _ = controller.rotate(job, now);
            }
            let _ = Aggregator::context_for(&mut controller, job, now);
            controller.record(&outcome(job));
            job += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, window_benchmark);
criterion_main!(benches);
