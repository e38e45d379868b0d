//! Shutdown coordination for a simulation run.
//!
//! The coordinator owns the `Running -> ShuttingDown -> Terminated` state machine. Two paths
//! start a shutdown:
//!
//! - [`ShutdownCoordinator::initiate_shutdown`] runs on an ordinary thread (the supervisor on
//!   timeout) and may log.
//! - [`ShutdownCoordinator::interrupt`] runs inside a signal handler. It is limited to an atomic
//!   compare-exchange, the queue's lock-free `shutdown`, and a raw `write(2)` to stderr.
//!
//! Both paths have the same effect. Joining workers, stopping the sampler and moving to
//! `Terminated` happen afterwards on the supervising thread only.

use crate::metrics::SamplerHandle;
use crate::queue::PriorityBoundedQueue;
use crate::worker::{WorkerHandle, WorkerOutcome};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const TERMINATED: u8 = 2;

/// How often the supervisor re-checks the state while waiting for the run to end.
const SUPERVISOR_POLL: Duration = Duration::from_millis(100);

/// Lifecycle of a run. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    ShuttingDown,
    Terminated,
}

impl ShutdownState {
    fn from_raw(raw: u8) -> ShutdownState {
        match raw {
            RUNNING => ShutdownState::Running,
            SHUTTING_DOWN => ShutdownState::ShuttingDown,
            _ => ShutdownState::Terminated,
        }
    }
}

/// Owns the shutdown state plus everything that must be torn down when it flips.
pub struct ShutdownCoordinator {
    state: AtomicU8,
    queue: Arc<PriorityBoundedQueue>,
    workers: Mutex<Vec<WorkerHandle>>,
    sampler: Mutex<Option<SamplerHandle>>,
}

impl ShutdownCoordinator {
    pub fn new(queue: Arc<PriorityBoundedQueue>) -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            queue,
            workers: Mutex::new(Vec::new()),
            sampler: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Cheap check polled by workers at loop boundaries and between sleep chunks.
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Cooperative shutdown from an ordinary thread.
    ///
    /// Moves `Running -> ShuttingDown` and shuts the queue down, waking every parked caller.
    ///
    /// # Returns
    /// `true` if this call performed the transition, `false` if shutdown had already begun.
    pub fn initiate_shutdown(&self) -> bool {
        let began = self.begin();
        if began {
            log::info!("shutdown initiated");
        }
        self.queue.shutdown();
        began
    }

    /// Shutdown from signal-handler context.
    ///
    /// Same effect as [`initiate_shutdown`](Self::initiate_shutdown), restricted to
    /// async-signal-safe operations: an atomic compare-exchange, semaphore releases, and one
    /// unbuffered `write(2)` on the first transition. Later calls change nothing.
    pub fn interrupt(&self) {
        if self.begin() {
            raw_notice(b"\ninterrupt received, shutting down\n");
        }
        self.queue.shutdown();
    }

    fn begin(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Block the calling thread until shutdown begins or `timeout` elapses.
    ///
    /// # Returns
    /// `true` if the timeout elapsed while still running, `false` if shutdown began first.
    pub fn wait_while_running(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SUPERVISOR_POLL.min(deadline - now));
        }
        false
    }

    /// Track a spawned worker so [`join_all`](Self::join_all) can reap it.
    pub fn register(&self, worker: WorkerHandle) {
        self.workers.lock().push(worker);
    }

    /// Hand over the occupancy sampler so [`finalize`](Self::finalize) can stop it.
    pub fn attach_sampler(&self, sampler: SamplerHandle) {
        if let Some(previous) = self.sampler.lock().replace(sampler) {
            log::warn!("replacing an attached sampler; stopping the previous one");
            if previous.stop().is_err() {
                log::error!("previous occupancy sampler panicked");
            }
        }
    }

    /// Join every registered worker.
    ///
    /// A worker that panicked is logged and reported with no stats; the remaining workers are
    /// still joined. Call after shutdown has begun, otherwise this blocks until the workers
    /// stop on their own.
    pub fn join_all(&self) -> Vec<WorkerOutcome> {
        let handles = std::mem::take(&mut *self.workers.lock());
        handles
            .into_iter()
            .map(|handle| {
                let (role, id) = (handle.role(), handle.id());
                match handle.join() {
                    Ok(stats) => WorkerOutcome {
                        role,
                        id,
                        stats: Some(stats),
                    },
                    Err(_) => {
                        log::error!("{role} {id}: thread panicked before joining");
                        WorkerOutcome {
                            role,
                            id,
                            stats: None,
                        }
                    }
                }
            })
            .collect()
    }

    /// Tear down the run on the supervising thread and move to `Terminated`.
    ///
    /// Starts the shutdown if nobody did, joins any workers not yet reaped, and stops the
    /// sampler. Never call from a signal handler: this joins threads.
    pub fn finalize(&self) {
        if self.is_running() {
            self.initiate_shutdown();
        }

        let leftover = self.join_all();
        if !leftover.is_empty() {
            log::warn!("finalize joined {} worker(s) nobody reaped", leftover.len());
        }

        if let Some(sampler) = self.sampler.lock().take() {
            if sampler.stop().is_err() {
                log::error!("occupancy sampler panicked");
            }
        }

        self.state.store(TERMINATED, Ordering::Release);
        log::info!("shutdown complete");
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn raw_notice(text: &[u8]) {
    unsafe {
        let _ = libc::write(
            libc::STDERR_FILENO,
            text.as_ptr() as *const libc::c_void,
            text.len(),
        );
    }
}

#[cfg(not(unix))]
fn raw_notice(_text: &[u8]) {}
