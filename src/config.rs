//! Runtime configuration and compile-time limits.

use crate::error::ConfigError;
use crate::priority::{P_MAX, P_MIN};
use std::ops::RangeInclusive;
use std::time::Duration;

/// Hard bounds every run is validated against.
pub mod limits {
    use std::time::Duration;

    pub const MIN_PRODUCERS: usize = 1;
    pub const MAX_PRODUCERS: usize = 10;
    pub const MIN_CONSUMERS: usize = 1;
    /// Consumers the queue is sized for; bounds the default shutdown wake-up budget.
    pub const MAX_CONSUMERS: usize = 5;
    /// Consumers a run may actually start.
    pub const MAX_RUNTIME_CONSUMERS: usize = 3;
    pub const MIN_QUEUE_SIZE: usize = 1;
    pub const MAX_QUEUE_SIZE: usize = 20;
    pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
    pub const MAX_PRODUCER_WAIT: Duration = Duration::from_secs(2);
    pub const MAX_CONSUMER_WAIT: Duration = Duration::from_secs(4);
    pub const PAYLOAD_MIN: i64 = 0;
    pub const PAYLOAD_MAX: i64 = 9;
    /// Worker sleeps are split into chunks no longer than this.
    pub const SLEEP_CHUNK: Duration = Duration::from_millis(200);
}

/// Everything a simulation run needs, validated by [`SimulationConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Number of producer threads.
    pub producers: usize,
    /// Number of consumer threads.
    pub consumers: usize,
    /// Queue slots.
    pub capacity: usize,
    /// How long the run lasts before the timeout triggers shutdown.
    pub run_for: Duration,
    /// Wait that earns one priority level (`Duration::ZERO` disables aging).
    pub aging_interval: Duration,
    /// Upper bound of the random think-time after each produce.
    pub producer_max_wait: Duration,
    /// Upper bound of the random think-time after each consume.
    pub consumer_max_wait: Duration,
    /// Seed for reproducible workloads; `None` draws from OS entropy.
    pub seed: Option<u64>,
    /// Period of the occupancy sampler.
    pub sample_interval: Duration,
    /// Inclusive range of generated payload values.
    pub payload_range: RangeInclusive<i64>,
    /// Inclusive range of generated base priorities.
    pub priority_range: RangeInclusive<u8>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            producers: 3,
            consumers: 2,
            capacity: 10,
            run_for: Duration::from_secs(10),
            aging_interval: Duration::ZERO,
            producer_max_wait: limits::MAX_PRODUCER_WAIT,
            consumer_max_wait: limits::MAX_CONSUMER_WAIT,
            seed: None,
            sample_interval: Duration::from_secs(1),
            payload_range: limits::PAYLOAD_MIN..=limits::PAYLOAD_MAX,
            priority_range: P_MIN..=P_MAX,
        }
    }
}

impl SimulationConfig {
    /// Check every parameter against [`limits`].
    ///
    /// # Errors
    /// The first [`ConfigError`] found, in field order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_count(
            self.producers,
            limits::MIN_PRODUCERS,
            limits::MAX_PRODUCERS,
        )
        .map_err(|(got, min, max)| ConfigError::Producers { got, min, max })?;
        check_count(
            self.consumers,
            limits::MIN_CONSUMERS,
            limits::MAX_RUNTIME_CONSUMERS,
        )
        .map_err(|(got, min, max)| ConfigError::Consumers { got, min, max })?;
        check_count(
            self.capacity,
            limits::MIN_QUEUE_SIZE,
            limits::MAX_QUEUE_SIZE,
        )
        .map_err(|(got, min, max)| ConfigError::QueueSize { got, min, max })?;

        if self.run_for < limits::MIN_TIMEOUT {
            return Err(ConfigError::Timeout {
                got: self.run_for,
                min: limits::MIN_TIMEOUT,
            });
        }
        if self.producer_max_wait > limits::MAX_PRODUCER_WAIT {
            return Err(ConfigError::MaxWait {
                role: "producer",
                got: self.producer_max_wait,
                max: limits::MAX_PRODUCER_WAIT,
            });
        }
        if self.consumer_max_wait > limits::MAX_CONSUMER_WAIT {
            return Err(ConfigError::MaxWait {
                role: "consumer",
                got: self.consumer_max_wait,
                max: limits::MAX_CONSUMER_WAIT,
            });
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::SampleInterval);
        }

        let (lo, hi) = (*self.payload_range.start(), *self.payload_range.end());
        if lo > hi || lo < limits::PAYLOAD_MIN || hi > limits::PAYLOAD_MAX {
            return Err(ConfigError::Range {
                what: "payload",
                lo,
                hi,
                min: limits::PAYLOAD_MIN,
                max: limits::PAYLOAD_MAX,
            });
        }
        let (lo, hi) = (*self.priority_range.start(), *self.priority_range.end());
        if lo > hi || hi > P_MAX {
            return Err(ConfigError::Range {
                what: "priority",
                lo: i64::from(lo),
                hi: i64::from(hi),
                min: i64::from(P_MIN),
                max: i64::from(P_MAX),
            });
        }
        Ok(())
    }

    /// Largest number of callers that can be parked inside the queue at once.
    pub fn max_waiters(&self) -> usize {
        self.producers + self.consumers
    }
}

fn check_count(got: usize, min: usize, max: usize) -> Result<(), (usize, usize, usize)> {
    if (min..=max).contains(&got) {
        Ok(())
    } else {
        Err((got, min, max))
    }
}
