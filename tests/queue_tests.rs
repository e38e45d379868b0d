// Integration tests for the priority bounded queue.
// These exercise arbitration order, blocking detection and shutdown liveness through the
// public API only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use prodcon_sim::{limits, Message, Priority, PriorityBoundedQueue, QueueError};

fn msg(payload: i64, priority: u8) -> Message {
    Message::new(payload, Priority::saturating(priority), 1)
}

#[test]
fn higher_priority_first_then_insertion_order() {
    let queue = PriorityBoundedQueue::new(3, Duration::ZERO).unwrap();
    queue.enqueue(msg(b'A' as i64, 2)).unwrap();
    queue.enqueue(msg(b'B' as i64, 7)).unwrap();
    queue.enqueue(msg(b'C' as i64, 2)).unwrap();

    let order: Vec<i64> = (0..3)
        .map(|_| queue.dequeue().unwrap().message.payload())
        .collect();
    assert_eq!(order, vec![b'B' as i64, b'A' as i64, b'C' as i64]);
    assert!(queue.is_empty());
}

#[test]
fn equal_priority_serves_older_timestamp_even_if_inserted_later() {
    let queue = PriorityBoundedQueue::new(3, Duration::ZERO).unwrap();
    let base = Instant::now();
    let later =
        Message::with_timestamp(1, Priority::saturating(5), 1, base + Duration::from_millis(20));
    let earlier = Message::with_timestamp(2, Priority::saturating(5), 2, base);

    queue.enqueue(later).unwrap();
    queue.enqueue(earlier).unwrap();

    assert_eq!(queue.dequeue().unwrap().message.payload(), 2);
    assert_eq!(queue.dequeue().unwrap().message.payload(), 1);
}

#[test]
fn full_queue_reports_blocked_enqueue() {
    let queue = Arc::new(PriorityBoundedQueue::new(1, Duration::ZERO).unwrap());
    let first = queue.enqueue(msg(1, 5)).unwrap();
    assert!(!first.was_blocked);

    let (tx, rx) = mpsc::channel();
    let producer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            let _ = tx.send(queue.enqueue(msg(2, 5)));
        })
    };

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(queue.dequeue().unwrap().message.payload(), 1);

    let second = rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
    assert!(second.was_blocked);
    assert!(second.waited >= Duration::from_millis(50));
    producer.join().unwrap();
    assert_eq!(queue.dequeue().unwrap().message.payload(), 2);
}

#[test]
fn aged_message_overtakes_fresher_higher_base() {
    let queue = PriorityBoundedQueue::new(2, Duration::from_millis(100)).unwrap();
    let now = Instant::now();
    let inserted_at = now
        .checked_sub(Duration::from_millis(250))
        .expect("monotonic clock should reach 250ms back");
    let x = Message::with_timestamp(b'X' as i64, Priority::saturating(2), 1, inserted_at);
    let y = Message::with_timestamp(b'Y' as i64, Priority::saturating(3), 2, now);
    assert_eq!(
        x.effective_priority(now, queue.aging_interval()),
        Priority::saturating(4)
    );
    assert_eq!(
        y.effective_priority(now, queue.aging_interval()),
        Priority::saturating(3)
    );

    queue.enqueue(x).unwrap();
    queue.enqueue(y).unwrap();
    assert_eq!(queue.peek().unwrap().map(|m| m.payload()), Some(b'X' as i64));
    assert_eq!(queue.dequeue().unwrap().message.payload(), b'X' as i64);
    assert_eq!(queue.dequeue().unwrap().message.payload(), b'Y' as i64);
}

#[test]
fn capacity_bounds_are_enforced() {
    assert!(matches!(
        PriorityBoundedQueue::new(limits::MIN_QUEUE_SIZE - 1, Duration::ZERO),
        Err(QueueError::CapacityOutOfRange { .. })
    ));
    assert!(matches!(
        PriorityBoundedQueue::new(limits::MAX_QUEUE_SIZE + 1, Duration::ZERO),
        Err(QueueError::CapacityOutOfRange { .. })
    ));
    assert!(PriorityBoundedQueue::new(limits::MAX_QUEUE_SIZE, Duration::ZERO).is_ok());
}

#[test]
fn concurrent_traffic_conserves_messages() {
    const PRODUCERS: u32 = 4;
    const CONSUMERS: usize = 3;
    const PER_PRODUCER: i64 = 500;

    let queue = Arc::new(
        PriorityBoundedQueue::new(5, Duration::from_millis(1))
            .unwrap()
            .with_max_waiters(PRODUCERS as usize + CONSUMERS),
    );
    let consumed = Arc::new(AtomicU64::new(0));
    let checksum = Arc::new(AtomicU64::new(0));

    let producers: Vec<_> = (1..=PRODUCERS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    let priority = Priority::saturating((n % 10) as u8);
                    queue.enqueue(Message::new(n, priority, id)).unwrap();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let consumed = Arc::clone(&consumed);
            let checksum = Arc::clone(&checksum);
            std::thread::spawn(move || loop {
                match queue.dequeue() {
                    Ok(dequeued) => {
                        consumed.fetch_add(1, Ordering::Relaxed);
                        checksum.fetch_add(dequeued.message.payload() as u64, Ordering::Relaxed);
                    }
                    Err(QueueError::Terminated) => break,
                    Err(err) => panic!("unexpected queue error: {err}"),
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while !queue.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(queue.shutdown());
    for consumer in consumers {
        consumer.join().unwrap();
    }

    let produced = u64::from(PRODUCERS) * PER_PRODUCER as u64;
    let expected_sum = u64::from(PRODUCERS) * (0..PER_PRODUCER).sum::<i64>() as u64;
    assert_eq!(consumed.load(Ordering::Relaxed) + queue.len() as u64, produced);
    assert_eq!(queue.len(), 0);
    assert_eq!(checksum.load(Ordering::Relaxed), expected_sum);
}

#[test]
fn shutdown_releases_every_parked_caller() {
    let queue = Arc::new(
        PriorityBoundedQueue::new(1, Duration::ZERO)
            .unwrap()
            .with_max_waiters(6),
    );
    queue.enqueue(msg(0, 0)).unwrap();

    let (tx, rx) = mpsc::channel();
    let mut threads = Vec::new();
    for _ in 0..3 {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        threads.push(std::thread::spawn(move || {
            let _ = tx.send(queue.enqueue(msg(1, 1)).map(|_| ()));
        }));
    }
    drop(tx);
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    assert!(queue.shutdown());
    assert!(!queue.shutdown());

    let results: Vec<_> = rx.iter().take(3).collect();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| matches!(r, Err(QueueError::Terminated))));
    assert!(started.elapsed() < Duration::from_secs(2));
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(queue.len(), 1);
    assert!(matches!(queue.dequeue(), Err(QueueError::Terminated)));
    assert!(matches!(queue.enqueue(msg(2, 2)), Err(QueueError::Terminated)));
}

#[test]
fn snapshot_lists_messages_in_ring_order() {
    let queue = PriorityBoundedQueue::new(4, Duration::ZERO).unwrap();
    for (payload, priority) in [(1, 3), (2, 9), (3, 1)] {
        queue.enqueue(msg(payload, priority)).unwrap();
    }
    assert_eq!(queue.dequeue().unwrap().message.payload(), 2);
    queue.enqueue(msg(4, 0)).unwrap();

    let payloads: Vec<i64> = queue.snapshot().iter().map(Message::payload).collect();
    assert_eq!(payloads, vec![1, 3, 4]);
    assert!(!queue.is_full());
}
