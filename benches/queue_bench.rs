use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;

use prodcon_sim::priority::Priority;
use prodcon_sim::{limits, Message, PriorityBoundedQueue};

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_uncontended");

    group.bench_function("enqueue_dequeue", |b| {
        let queue = PriorityBoundedQueue::new(limits::MAX_QUEUE_SIZE, Duration::ZERO).unwrap();
        let message = Message::new(7, Priority::saturating(4), 1);

        b.iter(|| {
            queue.enqueue(black_box(message)).unwrap();
            black_box(queue.dequeue().unwrap());
        });
    });

    group.bench_function("dequeue_from_full_with_aging", |b| {
        let queue =
            PriorityBoundedQueue::new(limits::MAX_QUEUE_SIZE, Duration::from_millis(1)).unwrap();
        for n in 0..limits::MAX_QUEUE_SIZE - 1 {
            queue
                .enqueue(Message::new(n as i64, Priority::saturating((n % 10) as u8), 1))
                .unwrap();
        }
        let message = Message::new(0, Priority::saturating(9), 2);

        b.iter(|| {
            queue.enqueue(black_box(message)).unwrap();
            black_box(queue.dequeue().unwrap());
        });
    });

    group.finish();
}

fn bench_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_contended");
    group.sample_size(20);

    group.bench_function("two_producers_two_consumers_1000", |b| {
        b.iter(|| {
            let queue = Arc::new(PriorityBoundedQueue::new(8, Duration::ZERO).unwrap());
            let mut threads = Vec::new();
            for id in 1..=2 {
                let queue = Arc::clone(&queue);
                threads.push(std::thread::spawn(move || {
                    for n in 0..500 {
                        queue
                            .enqueue(Message::new(n, Priority::saturating((n % 10) as u8), id))
                            .unwrap();
                    }
                }));
            }
            for _ in 0..2 {
                let queue = Arc::clone(&queue);
                threads.push(std::thread::spawn(move || {
                    for _ in 0..500 {
                        black_box(queue.dequeue().unwrap());
                    }
                }));
            }
            for thread in threads {
                thread.join().unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_uncontended, bench_contended);
criterion_main!(benches);
