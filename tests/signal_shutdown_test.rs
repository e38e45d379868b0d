// Signal-driven shutdown tests.
// Signal dispositions are process-wide, so every test here holds SIGNAL_LOCK.
#![cfg(unix)]

use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use prodcon_sim::{
    signals, PriorityBoundedQueue, QueueError, ShutdownCoordinator, ShutdownState, Simulation,
    SimulationConfig,
};

static SIGNAL_LOCK: Mutex<()> = parking_lot::const_mutex(());

#[test]
fn sigterm_moves_coordinator_to_shutting_down_and_wakes_consumer() {
    let _guard = SIGNAL_LOCK.lock();

    let queue = Arc::new(PriorityBoundedQueue::new(2, Duration::ZERO).unwrap());
    let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&queue)));
    signals::install(&coordinator).unwrap();

    let (tx, rx) = mpsc::channel();
    let consumer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || {
            let _ = tx.send(queue.dequeue());
        })
    };
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(unsafe { libc::raise(libc::SIGTERM) }, 0);
    assert_eq!(coordinator.state(), ShutdownState::ShuttingDown);
    assert!(queue.is_shutdown());

    let woken = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(woken, Err(QueueError::Terminated)));
    consumer.join().unwrap();

    // A second signal changes nothing.
    assert_eq!(unsafe { libc::raise(libc::SIGINT) }, 0);
    assert_eq!(coordinator.state(), ShutdownState::ShuttingDown);

    coordinator.finalize();
    assert_eq!(coordinator.state(), ShutdownState::Terminated);
    signals::restore_default().unwrap();
}

#[test]
fn sigint_ends_simulation_early() {
    let _guard = SIGNAL_LOCK.lock();

    let simulation = Simulation::new(SimulationConfig {
        producers: 3,
        consumers: 2,
        capacity: 4,
        run_for: Duration::from_secs(60),
        producer_max_wait: Duration::from_millis(20),
        consumer_max_wait: Duration::from_millis(40),
        seed: Some(5),
        sample_interval: Duration::from_millis(20),
        ..SimulationConfig::default()
    })
    .unwrap();
    signals::install(simulation.coordinator()).unwrap();

    let trigger = std::thread::spawn(|| {
        std::thread::sleep(Duration::from_millis(300));
        unsafe { libc::raise(libc::SIGINT) }
    });

    let started = Instant::now();
    let report = simulation.run().unwrap();
    assert_eq!(trigger.join().unwrap(), 0);
    signals::restore_default().unwrap();

    assert!(report.interrupted);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.workers.iter().all(|w| w.stats.is_some()));
    assert_eq!(
        report.analytics.produced,
        report.analytics.consumed + report.final_count as u64
    );
}
