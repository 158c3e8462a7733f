//! Scheduling and delivery benchmarks for Taskweave
//!
//! This benchmark suite measures:
//! - Ready-index dispatch cost in the registry
//! - End-to-end scheduler throughput with a no-op executor
//! - Message bus fan-out

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use taskweave::domain::task::TaskRegistry;
use taskweave::{
    BoxError, Message, MessageBus, Priority, SchedulerConfig, TaskScheduler, WorkDescriptor,
};
use tokio::runtime::Runtime;

const PRIORITIES: [Priority; 4] = [
    Priority::Critical,
    Priority::High,
    Priority::Medium,
    Priority::Low,
];

/// Benchmark inserting and draining the registry without execution
fn bench_registry_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_dispatch");

    for task_count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*task_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            task_count,
            |b, &count| {
                b.iter(|| {
                    let mut registry = TaskRegistry::new();
                    for i in 0..count {
                        registry.insert(
                            WorkDescriptor::handler("noop"),
                            PRIORITIES[i % PRIORITIES.len()],
                            [],
                        );
                    }
                    while let Some(task) = registry.next_ready(usize::MAX) {
                        black_box(task.id);
                    }
                    registry
                });
            },
        );
    }

    group.finish();
}

/// Benchmark a full drive over independent tasks
fn bench_scheduler_drive(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_drive");
    let runtime = Runtime::new().expect("tokio runtime");

    for max_concurrent in [1, 8, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("500_tasks", max_concurrent),
            max_concurrent,
            |b, &max_concurrent| {
                b.to_async(&runtime).iter(|| async move {
                    let scheduler = TaskScheduler::new(
                        |descriptor: WorkDescriptor| async move {
                            Ok::<_, BoxError>(descriptor.payload)
                        },
                        SchedulerConfig {
                            max_concurrent,
                            ..Default::default()
                        },
                    );
                    for i in 0..500 {
                        scheduler
                            .submit(
                                WorkDescriptor::new("noop", json!(i)),
                                PRIORITIES[i % PRIORITIES.len()],
                                [],
                            )
                            .await
                            .expect("scheduler open");
                    }
                    black_box(scheduler.await_all().await.len())
                });
            },
        );
    }

    group.finish();
}

/// Benchmark publishing one event to many subscribers
fn bench_bus_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus_fanout");
    let runtime = Runtime::new().expect("tokio runtime");

    for subscribers in [1, 16, 256].iter() {
        let bus = MessageBus::default();
        for i in 0..*subscribers {
            bus.subscribe(format!("sub-{i}"), ["bench"], |message: Message| async move {
                black_box(message.id);
                Ok::<(), BoxError>(())
            })
            .expect("bus open");
        }

        group.throughput(Throughput::Elements(*subscribers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            subscribers,
            |b, _| {
                b.to_async(&runtime).iter(|| async {
                    let message = Message::event("bench", "bencher", "tick", json!(null));
                    black_box(bus.publish(message).await.expect("bus open"))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_registry_dispatch,
    bench_scheduler_drive,
    bench_bus_fanout
);
criterion_main!(benches);
