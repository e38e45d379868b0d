//! Metrics collection for a simulation run.
//!
//! Workers report events through the [`MetricsSink`] trait on their hot path, so every sink
//! call must return immediately: [`Analytics`] keeps its event counters in atomics and never
//! takes a lock there. Queue occupancy is observed separately by a background [`Sampler`]
//! thread that snapshots `len()` at a fixed period.

use crate::queue::PriorityBoundedQueue;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Upper bound on stored occupancy samples (ten minutes at one sample per second).
pub const MAX_SAMPLES: usize = 600;

/// Fire-and-forget event receiver used by workers.
///
/// Implementations must never block for long and must never fail the caller.
pub trait MetricsSink: Send + Sync {
    fn record_produce(&self);
    fn record_consume(&self);
    fn record_producer_block(&self);
    fn record_consumer_block(&self);
    /// Time a blocked call spent parked, in milliseconds.
    fn record_wait(&self, ms: u64);
    /// Time a message spent between creation and dequeue, in milliseconds.
    fn record_latency(&self, ms: u64);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_produce(&self) {}
    fn record_consume(&self) {}
    fn record_producer_block(&self) {}
    fn record_consumer_block(&self) {}
    fn record_wait(&self, _ms: u64) {}
    fn record_latency(&self, _ms: u64) {}
}

/// One occupancy observation taken by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OccupancySample {
    /// Seconds since the sampler started.
    pub time_secs: f64,
    pub occupancy: usize,
    pub capacity: usize,
}

impl OccupancySample {
    /// Occupancy as a percentage of capacity.
    pub fn utilisation(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.occupancy as f64 / self.capacity as f64 * 100.0
        }
    }
}

/// Aggregated occupancy history. Written only by the sampler thread.
#[derive(Debug, Clone, Default)]
struct Occupancy {
    samples: Vec<OccupancySample>,
    observations: u64,
    sum: u64,
    min: Option<usize>,
    max: usize,
    full: u64,
    empty: u64,
}

/// Lock-free event counters plus the sampled occupancy history.
#[derive(Debug)]
pub struct Analytics {
    capacity: usize,
    produced: AtomicU64,
    consumed: AtomicU64,
    producer_blocks: AtomicU64,
    consumer_blocks: AtomicU64,
    wait_total_ms: AtomicU64,
    wait_count: AtomicU64,
    wait_max_ms: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_count: AtomicU64,
    latency_min_ms: AtomicU64,
    latency_max_ms: AtomicU64,
    occupancy: Mutex<Occupancy>,
}

/// Point-in-time copy of every counter in [`Analytics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub capacity: usize,
    pub produced: u64,
    pub consumed: u64,
    pub producer_blocks: u64,
    pub consumer_blocks: u64,
    pub wait_total_ms: u64,
    pub wait_count: u64,
    pub wait_max_ms: u64,
    pub latency_total_ms: u64,
    pub latency_count: u64,
    pub latency_min_ms: Option<u64>,
    pub latency_max_ms: u64,
    pub occupancy_observations: u64,
    pub occupancy_sum: u64,
    pub occupancy_min: Option<usize>,
    pub occupancy_max: usize,
    pub full_observations: u64,
    pub empty_observations: u64,
    #[serde(skip)]
    pub samples: Vec<OccupancySample>,
}

impl AnalyticsSnapshot {
    /// Mean latency in milliseconds, or `None` without samples.
    pub fn average_latency_ms(&self) -> Option<f64> {
        (self.latency_count > 0).then(|| self.latency_total_ms as f64 / self.latency_count as f64)
    }

    /// Mean blocked wait in milliseconds, or `None` if nobody blocked.
    pub fn average_wait_ms(&self) -> Option<f64> {
        (self.wait_count > 0).then(|| self.wait_total_ms as f64 / self.wait_count as f64)
    }

    /// Mean sampled occupancy, `0.0` without observations.
    pub fn average_occupancy(&self) -> f64 {
        if self.occupancy_observations == 0 {
            0.0
        } else {
            self.occupancy_sum as f64 / self.occupancy_observations as f64
        }
    }
}

impl Analytics {
    /// Create an empty collector for a queue of the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            produced: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            producer_blocks: AtomicU64::new(0),
            consumer_blocks: AtomicU64::new(0),
            wait_total_ms: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
            wait_max_ms: AtomicU64::new(0),
            latency_total_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            latency_min_ms: AtomicU64::new(u64::MAX),
            latency_max_ms: AtomicU64::new(0),
            occupancy: Mutex::new(Occupancy::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record one occupancy observation.
    ///
    /// The time series stops growing at [`MAX_SAMPLES`]; the aggregates (sum, min, max,
    /// full/empty counts) keep updating so long runs still produce correct averages.
    pub fn record_occupancy(&self, time_secs: f64, occupancy: usize) {
        let mut stats = self.occupancy.lock();
        if stats.samples.len() < MAX_SAMPLES {
            stats.samples.push(OccupancySample {
                time_secs,
                occupancy,
                capacity: self.capacity,
            });
        }
        stats.observations += 1;
        stats.sum += occupancy as u64;
        stats.min = Some(stats.min.map_or(occupancy, |min| min.min(occupancy)));
        stats.max = stats.max.max(occupancy);
        if occupancy >= self.capacity {
            stats.full += 1;
        }
        if occupancy == 0 {
            stats.empty += 1;
        }
    }

    /// Copy every counter and the sample history.
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let occupancy = self.occupancy.lock().clone();
        let latency_min = self.latency_min_ms.load(Ordering::Relaxed);
        AnalyticsSnapshot {
            capacity: self.capacity,
            produced: self.produced.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            producer_blocks: self.producer_blocks.load(Ordering::Relaxed),
            consumer_blocks: self.consumer_blocks.load(Ordering::Relaxed),
            wait_total_ms: self.wait_total_ms.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
            wait_max_ms: self.wait_max_ms.load(Ordering::Relaxed),
            latency_total_ms: self.latency_total_ms.load(Ordering::Relaxed),
            latency_count: self.latency_count.load(Ordering::Relaxed),
            latency_min_ms: (latency_min != u64::MAX).then_some(latency_min),
            latency_max_ms: self.latency_max_ms.load(Ordering::Relaxed),
            occupancy_observations: occupancy.observations,
            occupancy_sum: occupancy.sum,
            occupancy_min: occupancy.min,
            occupancy_max: occupancy.max,
            full_observations: occupancy.full,
            empty_observations: occupancy.empty,
            samples: occupancy.samples,
        }
    }
}

impl MetricsSink for Analytics {
    fn record_produce(&self) {
        self.produced.fetch_add(1, Ordering::Relaxed);
    }

    fn record_consume(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_producer_block(&self) {
        self.producer_blocks.fetch_add(1, Ordering::Relaxed);
    }

    fn record_consumer_block(&self) {
        self.consumer_blocks.fetch_add(1, Ordering::Relaxed);
    }

    fn record_wait(&self, ms: u64) {
        self.wait_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        self.wait_max_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn record_latency(&self, ms: u64) {
        self.latency_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_min_ms.fetch_min(ms, Ordering::Relaxed);
        self.latency_max_ms.fetch_max(ms, Ordering::Relaxed);
    }
}

/// Background thread recording queue occupancy into [`Analytics`].
pub struct Sampler;

impl Sampler {
    /// Spawn the sampling thread.
    ///
    /// The first sample is taken immediately, then one per `interval` until the returned
    /// handle is stopped. The stop request is a channel disconnect, so the thread wakes as
    /// soon as `stop` is called instead of finishing its current interval.
    ///
    /// # Errors
    /// The OS error if the thread cannot be spawned.
    pub fn start(
        analytics: Arc<Analytics>,
        queue: Arc<PriorityBoundedQueue>,
        interval: Duration,
    ) -> io::Result<SamplerHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name("occupancy-sampler".to_string())
            .spawn(move || {
                log::debug!("occupancy sampler started ({}ms)", interval.as_millis());
                let started = Instant::now();
                loop {
                    let occupancy = queue.len();
                    analytics.record_occupancy(started.elapsed().as_secs_f64(), occupancy);
                    log::trace!("occupancy sample: {occupancy}/{}", queue.capacity());

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("occupancy sampler stopped");
            })?;
        Ok(SamplerHandle { stop_tx, handle })
    }
}

/// Owner of a running sampler thread.
pub struct SamplerHandle {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl SamplerHandle {
    /// Stop the sampler and join its thread.
    pub fn stop(self) -> std::thread::Result<()> {
        drop(self.stop_tx);
        self.handle.join()
    }
}

impl std::fmt::Debug for SamplerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplerHandle")
            .field("thread", &self.handle.thread().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let analytics = Analytics::new(4);
        analytics.record_produce();
        analytics.record_produce();
        analytics.record_consume();
        analytics.record_producer_block();
        analytics.record_wait(30);
        analytics.record_wait(10);
        analytics.record_latency(5);
        analytics.record_latency(15);

        let snap = analytics.snapshot();
        assert_eq!(snap.produced, 2);
        assert_eq!(snap.consumed, 1);
        assert_eq!(snap.producer_blocks, 1);
        assert_eq!(snap.consumer_blocks, 0);
        assert_eq!(snap.wait_max_ms, 30);
        assert_eq!(snap.average_wait_ms(), Some(20.0));
        assert_eq!(snap.latency_min_ms, Some(5));
        assert_eq!(snap.latency_max_ms, 15);
        assert_eq!(snap.average_latency_ms(), Some(10.0));
    }

    #[test]
    fn empty_latency_has_no_minimum() {
        let snap = Analytics::new(1).snapshot();
        assert_eq!(snap.latency_min_ms, None);
        assert_eq!(snap.average_latency_ms(), None);
        assert_eq!(snap.average_occupancy(), 0.0);
    }

    #[test]
    fn occupancy_aggregates_survive_sample_cap() {
        let analytics = Analytics::new(2);
        for i in 0..(MAX_SAMPLES + 10) {
            analytics.record_occupancy(i as f64, i % 3);
        }
        let snap = analytics.snapshot();
        assert_eq!(snap.samples.len(), MAX_SAMPLES);
        assert_eq!(snap.occupancy_observations, (MAX_SAMPLES + 10) as u64);
        assert_eq!(snap.occupancy_min, Some(0));
        assert_eq!(snap.occupancy_max, 2);
        assert!(snap.full_observations > 0);
        assert!(snap.empty_observations > 0);
    }

    #[test]
    fn sampler_records_until_stopped() {
        let queue = Arc::new(PriorityBoundedQueue::new(3, Duration::ZERO).unwrap());
        let analytics = Arc::new(Analytics::new(3));
        let handle = Sampler::start(
            Arc::clone(&analytics),
            Arc::clone(&queue),
            Duration::from_millis(5),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(40));
        handle.stop().unwrap();

        let taken = analytics.snapshot().occupancy_observations;
        assert!(taken >= 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(analytics.snapshot().occupancy_observations, taken);
    }
}
