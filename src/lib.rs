//! Bounded multi-producer/multi-consumer simulation built around a priority queue with aging.
//!
//! Producers and consumers share one [`PriorityBoundedQueue`]. Dequeue picks the message with
//! the highest effective priority (base priority plus one level per aging interval waited),
//! oldest first on ties. A [`ShutdownCoordinator`] stops the run on timeout or on SIGINT/SIGTERM
//! and wakes every parked thread.

pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod priority;
pub mod queue;
pub mod report;
pub mod semaphore;
pub mod shutdown;
pub mod signals;
pub mod simulation;
pub mod worker;

// Re-export for easier testing
pub use config::{limits, SimulationConfig};
pub use error::{ConfigError, QueueError, SimulationError};
pub use message::Message;
pub use priority::Priority;
pub use queue::{Admission, Dequeued, PriorityBoundedQueue};
pub use shutdown::{ShutdownCoordinator, ShutdownState};
pub use simulation::{RunReport, Simulation};
