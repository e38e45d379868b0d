//! Simulation orchestration.
//!
//! A [`Simulation`] wires the queue, the analytics collector, the occupancy sampler and the
//! worker threads together, runs until the configured timeout or an interrupt, then tears
//! everything down on the calling thread and hands back a [`RunReport`].

use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::message::SourceId;
use crate::metrics::{Analytics, AnalyticsSnapshot, MetricsSink, Sampler};
use crate::queue::PriorityBoundedQueue;
use crate::shutdown::ShutdownCoordinator;
use crate::worker::{Role, Worker, WorkerConfig, WorkerOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything observed during one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub config: SimulationConfig,
    pub analytics: AnalyticsSnapshot,
    /// Joined workers, producers first, in spawn order.
    pub workers: Vec<WorkerOutcome>,
    /// Messages still queued after every worker stopped.
    pub final_count: usize,
    pub runtime: Duration,
    /// `true` if the run ended before its timeout.
    pub interrupted: bool,
}

/// Owns the shared state of a run. Nothing is spawned until [`run`](Self::run).
pub struct Simulation {
    config: SimulationConfig,
    queue: Arc<PriorityBoundedQueue>,
    analytics: Arc<Analytics>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl Simulation {
    /// Validate `config` and build the queue and coordinator.
    ///
    /// # Errors
    /// `SimulationError::Config` for an out-of-range parameter, `SimulationError::Queue` if the
    /// queue rejects its capacity.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;

        let queue = Arc::new(
            PriorityBoundedQueue::new(config.capacity, config.aging_interval)?
                .with_max_waiters(config.max_waiters()),
        );
        let analytics = Arc::new(Analytics::new(config.capacity));
        let coordinator = Arc::new(ShutdownCoordinator::new(Arc::clone(&queue)));

        Ok(Self {
            config,
            queue,
            analytics,
            coordinator,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<PriorityBoundedQueue> {
        &self.queue
    }

    pub fn analytics(&self) -> &Arc<Analytics> {
        &self.analytics
    }

    /// Coordinator to hand to [`signals::install`](crate::signals::install) before running.
    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    /// Run to completion on the calling thread.
    ///
    /// Starts the sampler and every worker, waits for the timeout or an interrupt, then joins
    /// the workers and records how many messages were left behind.
    ///
    /// # Errors
    /// `SimulationError::Spawn` if a thread cannot be started. Workers already running are
    /// shut down and joined before the error is returned.
    pub fn run(self) -> Result<RunReport, SimulationError> {
        let config = &self.config;
        log::info!(
            "starting run: producers={} consumers={} capacity={} timeout={}s aging={}ms",
            config.producers,
            config.consumers,
            config.capacity,
            config.run_for.as_secs(),
            config.aging_interval.as_millis()
        );
        let started = Instant::now();

        let sampler = Sampler::start(
            Arc::clone(&self.analytics),
            Arc::clone(&self.queue),
            config.sample_interval,
        )
        .map_err(|source| SimulationError::Spawn {
            name: "occupancy-sampler".to_string(),
            source,
        })?;
        self.coordinator.attach_sampler(sampler);

        if let Err(err) = self.spawn_workers() {
            log::error!("{err}; stopping the workers already started");
            self.coordinator.initiate_shutdown();
            self.coordinator.join_all();
            self.coordinator.finalize();
            return Err(err);
        }

        let timed_out = self.coordinator.wait_while_running(config.run_for);
        if timed_out {
            log::info!("timeout of {}s reached", config.run_for.as_secs());
            self.coordinator.initiate_shutdown();
        }

        let workers = self.coordinator.join_all();
        let final_count = self.queue.len();
        self.coordinator.finalize();
        let runtime = started.elapsed();

        log::info!(
            "run finished after {:.2}s with {final_count} message(s) left in the queue",
            runtime.as_secs_f64()
        );
        Ok(RunReport {
            analytics: self.analytics.snapshot(),
            config: self.config,
            workers,
            final_count,
            runtime,
            interrupted: !timed_out,
        })
    }

    fn spawn_workers(&self) -> Result<(), SimulationError> {
        let roles = [
            (Role::Producer, self.config.producers, self.config.producer_max_wait),
            (Role::Consumer, self.config.consumers, self.config.consumer_max_wait),
        ];
        let sink: Arc<dyn MetricsSink> = self.analytics.clone();

        for (role, count, max_wait) in roles {
            for id in 1..=count as SourceId {
                let worker = Worker::new(
                    role,
                    id,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.coordinator),
                    Arc::clone(&sink),
                    WorkerConfig {
                        max_wait,
                        seed: self.config.seed,
                        payload_range: self.config.payload_range.clone(),
                        priority_range: self.config.priority_range.clone(),
                    },
                );
                let handle = worker.spawn().map_err(|source| SimulationError::Spawn {
                    name: format!("{role}-{id}"),
                    source,
                })?;
                self.coordinator.register(handle);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}
