//! Task queue throughput benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;

use memloom::domain::models::{OverflowPolicy, ScheduleMessage, TaskLabel};
use memloom::services::{MetricsRegistry, StatusTracker, TaskQueue};

fn queue() -> TaskQueue {
    TaskQueue::in_memory(
        100_000,
        OverflowPolicy::DropOldest,
        Arc::new(StatusTracker::new()),
        Arc::new(MetricsRegistry::new()),
    )
}

fn messages(users: usize, per_user: usize) -> Vec<ScheduleMessage> {
    (0..users)
        .flat_map(|user| {
            (0..per_user).map(move |seq| {
                ScheduleMessage::new(
                    format!("user{user}"),
                    "cube",
                    TaskLabel::MemoryUpdate,
                    seq.to_string(),
                )
            })
        })
        .collect()
}

fn bench_submit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("submit_1000_messages_10_streams", |b| {
        b.iter_batched(
            || (queue(), messages(10, 100)),
            |(queue, batch)| {
                rt.block_on(async move {
                    queue.submit(batch).await;
                });
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_round_robin_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("drain_1000_messages_batch_20", |b| {
        b.iter_batched(
            || {
                let queue = queue();
                rt.block_on(queue.submit(messages(10, 100)));
                queue
            },
            |queue| {
                rt.block_on(async move {
                    loop {
                        if queue.get(20).await.is_empty() {
                            break;
                        }
                    }
                });
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_submit, bench_round_robin_drain);
criterion_main!(benches);
