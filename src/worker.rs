//! Producer and consumer threads.
//!
//! A [`Worker`] repeatedly calls into the shared queue according to its [`Role`], forwards
//! what happened to the metrics sink, then "thinks" for a random interval. The think-time is
//! slept in chunks of at most [`limits::SLEEP_CHUNK`] and the shutdown state is re-checked
//! between chunks, so a stop request is noticed quickly even with multi-second think-times.

use crate::config::limits;
use crate::error::QueueError;
use crate::message::{Message, SourceId};
use crate::metrics::MetricsSink;
use crate::priority::{Priority, P_MAX, P_MIN};
use crate::queue::PriorityBoundedQueue;
use crate::shutdown::ShutdownCoordinator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;
use std::io;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Which side of the queue a worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    /// Stable tag mixed into per-worker RNG seeds.
    const fn tag(self) -> u64 {
        match self {
            Role::Producer => 1,
            Role::Consumer => 2,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        };
        f.pad(label)
    }
}

/// Final counters exposed by a worker once its loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Messages written (producer) or read (consumer).
    pub items_handled: u64,
    /// Calls that found the queue full (producer) or empty (consumer) and had to wait.
    pub times_blocked: u64,
}

/// Joined worker as reported by the shutdown coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerOutcome {
    pub role: Role,
    pub id: SourceId,
    /// `None` if the thread panicked.
    pub stats: Option<WorkerStats>,
}

/// Tunables shared by every worker of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Upper bound of the random think-time after each operation.
    pub max_wait: Duration,
    /// Run seed; `None` seeds from OS entropy.
    pub seed: Option<u64>,
    /// Producer payload range.
    pub payload_range: RangeInclusive<i64>,
    /// Producer base-priority range.
    pub priority_range: RangeInclusive<u8>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::ZERO,
            seed: None,
            payload_range: limits::PAYLOAD_MIN..=limits::PAYLOAD_MAX,
            priority_range: P_MIN..=P_MAX,
        }
    }
}

/// One producer or consumer loop bound to a shared queue.
pub struct Worker {
    role: Role,
    id: SourceId,
    queue: Arc<PriorityBoundedQueue>,
    shutdown: Arc<ShutdownCoordinator>,
    sink: Arc<dyn MetricsSink>,
    config: WorkerConfig,
    rng: StdRng,
    stats: WorkerStats,
}

impl Worker {
    /// Build a worker; nothing runs until [`run`](Self::run) or [`spawn`](Self::spawn).
    ///
    /// With a seed, the RNG is derived from `(seed, role, id)` so every worker draws its own
    /// reproducible sequence.
    pub fn new(
        role: Role,
        id: SourceId,
        queue: Arc<PriorityBoundedQueue>,
        shutdown: Arc<ShutdownCoordinator>,
        sink: Arc<dyn MetricsSink>,
        config: WorkerConfig,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ (role.tag() << 32 | u64::from(id))),
            None => StdRng::from_entropy(),
        };
        Self {
            role,
            id,
            queue,
            shutdown,
            sink,
            config,
            rng,
            stats: WorkerStats::default(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Run the loop on the current thread until shutdown or a fatal queue error.
    pub fn run(mut self) -> WorkerStats {
        log::info!("{} {}: started", self.role, self.id);

        while self.shutdown.is_running() {
            match self.step() {
                Ok(()) => {}
                Err(QueueError::Terminated) => break,
                Err(err) => {
                    log::error!("{} {}: {err}; leaving loop", self.role, self.id);
                    break;
                }
            }
            self.think();
        }

        log::info!(
            "{} {}: stopped (total: {}, blocked: {})",
            self.role,
            self.id,
            self.stats.items_handled,
            self.stats.times_blocked
        );
        self.stats
    }

    /// Run the loop on a dedicated named thread.
    ///
    /// # Errors
    /// The OS error if the thread cannot be spawned.
    pub fn spawn(self) -> io::Result<WorkerHandle> {
        let (role, id) = (self.role, self.id);
        let handle = std::thread::Builder::new()
            .name(format!("{role}-{id}"))
            .spawn(move || self.run())?;
        Ok(WorkerHandle { role, id, handle })
    }

    fn step(&mut self) -> Result<(), QueueError> {
        match self.role {
            Role::Producer => self.produce(),
            Role::Consumer => self.consume(),
        }
    }

    fn produce(&mut self) -> Result<(), QueueError> {
        let payload = self.rng.gen_range(self.config.payload_range.clone());
        let priority = Priority::saturating(self.rng.gen_range(self.config.priority_range.clone()));
        let message = Message::new(payload, priority, self.id);

        let admission = self.queue.enqueue(message)?;
        if admission.was_blocked {
            self.stats.times_blocked += 1;
            self.sink.record_producer_block();
            self.sink.record_wait(millis(admission.waited));
            log::debug!(
                "producer {}: blocked {}ms on a full queue",
                self.id,
                admission.waited.as_millis()
            );
        }

        self.sink.record_produce();
        self.stats.items_handled += 1;
        log::debug!(
            "producer {}: wrote (pri={}, data={}) | queue {}/{}",
            self.id,
            priority,
            payload,
            self.queue.len(),
            self.queue.capacity()
        );
        Ok(())
    }

    fn consume(&mut self) -> Result<(), QueueError> {
        let dequeued = self.queue.dequeue()?;
        if dequeued.was_blocked {
            self.stats.times_blocked += 1;
            self.sink.record_consumer_block();
            self.sink.record_wait(millis(dequeued.waited));
            log::debug!(
                "consumer {}: blocked {}ms on an empty queue",
                self.id,
                dequeued.waited.as_millis()
            );
        }
        if let Some(latency) = dequeued.message.age(Instant::now()) {
            self.sink.record_latency(millis(latency));
        }

        self.sink.record_consume();
        self.stats.items_handled += 1;
        let message = dequeued.message;
        log::debug!(
            "consumer {}: read (pri={}, data={}) from P{} | queue {}/{}",
            self.id,
            message.priority(),
            message.payload(),
            message.source(),
            self.queue.len(),
            self.queue.capacity()
        );
        Ok(())
    }

    fn think(&mut self) {
        let max_ms = millis(self.config.max_wait);
        let total = Duration::from_millis(self.rng.gen_range(0..=max_ms));
        sleep_while_running(total, &self.shutdown);
    }
}

/// Handle to a spawned worker thread.
pub struct WorkerHandle {
    role: Role,
    id: SourceId,
    handle: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn join(self) -> std::thread::Result<WorkerStats> {
        self.handle.join()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("role", &self.role)
            .field("id", &self.id)
            .finish()
    }
}

/// Sleep for up to `total`, in chunks of at most [`limits::SLEEP_CHUNK`], returning early
/// once the coordinator leaves `Running`.
pub fn sleep_while_running(total: Duration, shutdown: &ShutdownCoordinator) {
    let deadline = Instant::now() + total;
    while shutdown.is_running() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(limits::SLEEP_CHUNK.min(deadline - now));
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
