//! Bounded priority queue shared by every producer and consumer.
//!
//! Storage is a fixed ring of `capacity` slots guarded by a mutex. Two counting semaphores
//! track free slots and ready items outside the lock, so a full queue parks producers and an
//! empty queue parks consumers without holding the mutex.
//!
//! Removal does not follow FIFO order. `dequeue` scans the occupied slots, picks the one with
//! the highest *effective* priority (base priority plus aging boost), breaks ties by the oldest
//! creation time, and closes the gap by shifting the slots between `front` and the victim one
//! position towards the rear. Occupied slots therefore always form one contiguous run starting
//! at `front`. The scan and shift are O(count), which is fine for the small capacities the
//! simulation allows.

use crate::config::limits;
use crate::error::QueueError;
use crate::message::Message;
use crate::priority::Priority;
use crate::semaphore::Semaphore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Result of a successful `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The queue was full when the call started, so the caller had to wait.
    pub was_blocked: bool,
    /// Time spent parked (zero when `was_blocked` is false).
    pub waited: Duration,
}

/// Result of a successful `dequeue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub message: Message,
    /// The queue was empty when the call started, so the caller had to wait.
    pub was_blocked: bool,
    /// Time spent parked (zero when `was_blocked` is false).
    pub waited: Duration,
}

/// Outcome of taking one unit from a semaphore.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    was_blocked: bool,
    waited: Duration,
}

/// Ring storage. Only touched while `PriorityBoundedQueue::ring` is locked.
#[derive(Debug)]
struct Ring {
    slots: Box<[Option<Message>]>,
    front: usize,
    rear: usize,
    count: usize,
}

impl Ring {
    fn new(capacity: usize) -> Ring {
        Ring {
            slots: vec![None; capacity].into_boxed_slice(),
            front: 0,
            rear: 0,
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn index(&self, offset: usize) -> usize {
        (self.front + offset) % self.capacity()
    }

    fn push(&mut self, message: Message) -> Result<(), QueueError> {
        if self.count >= self.capacity() {
            return Err(QueueError::InvariantViolation(
                "write attempted while every slot is occupied",
            ));
        }
        if self.slots[self.rear].is_some() {
            return Err(QueueError::InvariantViolation("rear slot already occupied"));
        }
        self.slots[self.rear] = Some(message);
        self.rear = (self.rear + 1) % self.capacity();
        self.count += 1;
        Ok(())
    }

    /// Slot index of the message to serve next.
    ///
    /// Highest effective priority wins; among equals the smallest `created_at` wins, and among
    /// identical timestamps the one nearest `front` (inserted first) wins.
    fn select(&self, now: Instant, aging_interval: Duration) -> Result<usize, QueueError> {
        let mut best: Option<(usize, Message, Priority)> = None;
        for offset in 0..self.count {
            let index = self.index(offset);
            let candidate = self.slots[index].ok_or(QueueError::InvariantViolation(
                "empty slot inside the occupied range",
            ))?;
            let effective = candidate.effective_priority(now, aging_interval);
            let better = match &best {
                None => true,
                Some((_, current, current_effective)) => {
                    effective > *current_effective
                        || (effective == *current_effective
                            && candidate.created_at() < current.created_at())
                }
            };
            if better {
                best = Some((index, candidate, effective));
            }
        }
        best.map(|(index, _, _)| index)
            .ok_or(QueueError::InvariantViolation(
                "arbitration found nothing while items were ready",
            ))
    }

    /// Remove the slot at `index` and shift its predecessors one step towards it.
    fn remove_at(&mut self, index: usize) -> Result<Message, QueueError> {
        let message = self.slots[index]
            .take()
            .ok_or(QueueError::InvariantViolation("selected slot is empty"))?;

        let capacity = self.capacity();
        let mut current = index;
        while current != self.front {
            let previous = (current + capacity - 1) % capacity;
            self.slots[current] = self.slots[previous].take();
            current = previous;
        }
        self.front = (self.front + 1) % capacity;
        self.count -= 1;
        Ok(message)
    }

    fn occupied(&self) -> impl Iterator<Item = &Message> + '_ {
        (0..self.count).filter_map(move |offset| self.slots[self.index(offset)].as_ref())
    }
}

/// Thread-safe bounded buffer with priority arbitration, aging and cooperative shutdown.
#[derive(Debug)]
pub struct PriorityBoundedQueue {
    ring: Mutex<Ring>,
    capacity: usize,
    aging_interval: Duration,
    shutdown: AtomicBool,
    slots_free: Semaphore,
    items_ready: Semaphore,
    /// Units released on each semaphore by `shutdown`; must cover every caller that can be
    /// parked at once.
    max_waiters: u32,
}

impl PriorityBoundedQueue {
    /// Create an empty queue.
    ///
    /// # Arguments
    /// * `capacity` - Number of slots, within `[MIN_QUEUE_SIZE, MAX_QUEUE_SIZE]`
    /// * `aging_interval` - Wait that earns one priority level; `Duration::ZERO` disables aging
    ///
    /// # Errors
    /// `QueueError::CapacityOutOfRange` when `capacity` is outside the configured bounds.
    pub fn new(capacity: usize, aging_interval: Duration) -> Result<Self, QueueError> {
        if !(limits::MIN_QUEUE_SIZE..=limits::MAX_QUEUE_SIZE).contains(&capacity) {
            return Err(QueueError::CapacityOutOfRange {
                requested: capacity,
                min: limits::MIN_QUEUE_SIZE,
                max: limits::MAX_QUEUE_SIZE,
            });
        }
        log::debug!(
            "queue initialised: capacity={capacity} aging={}ms",
            aging_interval.as_millis()
        );
        Ok(Self {
            ring: Mutex::new(Ring::new(capacity)),
            capacity,
            aging_interval,
            shutdown: AtomicBool::new(false),
            slots_free: Semaphore::new(capacity as u32),
            items_ready: Semaphore::new(0),
            max_waiters: (limits::MAX_PRODUCERS + limits::MAX_CONSUMERS) as u32,
        })
    }

    /// Override how many parked callers `shutdown` must be able to wake.
    pub fn with_max_waiters(mut self, max_waiters: usize) -> Self {
        self.max_waiters = max_waiters.max(1).min(u32::MAX as usize) as u32;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn aging_interval(&self) -> Duration {
        self.aging_interval
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.ring.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Insert a message, parking while the queue is full.
    ///
    /// # Returns
    /// An [`Admission`] telling whether this call had to wait and for how long.
    ///
    /// # Errors
    /// * `Terminated` once shutdown has been observed (the slot unit is handed back)
    /// * `InvariantViolation` if the ring is full despite holding a free-slot unit
    pub fn enqueue(&self, message: Message) -> Result<Admission, QueueError> {
        let ticket = self.acquire(&self.slots_free)?;

        let pushed = self.ring.lock().push(message);
        if let Err(err) = pushed {
            log::error!("enqueue of {message} failed: {err}");
            self.slots_free.release();
            return Err(err);
        }
        self.items_ready.release();

        log::trace!("enqueued {message} (blocked={})", ticket.was_blocked);
        Ok(Admission {
            was_blocked: ticket.was_blocked,
            waited: ticket.waited,
        })
    }

    /// Remove the message with the highest effective priority, parking while the queue is empty.
    ///
    /// # Errors
    /// * `Terminated` once shutdown has been observed (the item unit is handed back)
    /// * `InvariantViolation` if no message can be selected despite holding an item unit
    pub fn dequeue(&self) -> Result<Dequeued, QueueError> {
        let ticket = self.acquire(&self.items_ready)?;

        let removed = {
            let mut ring = self.ring.lock();
            ring.select(Instant::now(), self.aging_interval)
                .and_then(|index| ring.remove_at(index))
        };
        let message = match removed {
            Ok(message) => message,
            Err(err) => {
                log::error!("dequeue failed: {err}");
                self.items_ready.release();
                return Err(err);
            }
        };
        self.slots_free.release();

        log::trace!("dequeued {message} (blocked={})", ticket.was_blocked);
        Ok(Dequeued {
            message,
            was_blocked: ticket.was_blocked,
            waited: ticket.waited,
        })
    }

    /// The message `dequeue` would return right now, without removing it.
    ///
    /// # Errors
    /// `InvariantViolation` if the ring holds items but arbitration selects none.
    pub fn peek(&self) -> Result<Option<Message>, QueueError> {
        let ring = self.ring.lock();
        if ring.count == 0 {
            return Ok(None);
        }
        let selected = ring
            .select(Instant::now(), self.aging_interval)
            .and_then(|index| {
                ring.slots[index].ok_or(QueueError::InvariantViolation("selected slot is empty"))
            });
        match selected {
            Ok(message) => Ok(Some(message)),
            Err(err) => {
                log::error!("peek failed: {err}");
                Err(err)
            }
        }
    }

    /// Occupied messages in ring order, starting at `front`.
    pub fn snapshot(&self) -> Vec<Message> {
        self.ring.lock().occupied().copied().collect()
    }

    /// Stop the queue and wake every parked caller.
    ///
    /// Sets the shutdown flag, then releases `max_waiters` units on both semaphores so each
    /// parked `enqueue`/`dequeue` wakes, sees the flag and returns `Terminated`. Only an atomic
    /// swap and semaphore releases happen here: no lock, no allocation, no buffer access. That
    /// makes it safe to call from a signal handler.
    ///
    /// # Returns
    /// `true` for the call that performed the transition, `false` if already shut down.
    pub fn shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.slots_free.release_many(self.max_waiters);
        self.items_ready.release_many(self.max_waiters);
        true
    }

    /// Try-then-block acquisition shared by `enqueue` and `dequeue`.
    ///
    /// A failed `try_acquire` marks the call as blocked before it parks. After any successful
    /// acquisition the shutdown flag is re-checked; if it is set the unit goes straight back so
    /// the next parked caller can wake the same way.
    fn acquire(&self, units: &Semaphore) -> Result<Ticket, QueueError> {
        let mut ticket = Ticket {
            was_blocked: false,
            waited: Duration::ZERO,
        };
        if !units.try_acquire() {
            ticket.was_blocked = true;
            let started = Instant::now();
            let acquired = units.acquire(|| !self.is_shutdown());
            ticket.waited = started.elapsed();
            if !acquired {
                return Err(QueueError::Terminated);
            }
        }
        if self.is_shutdown() {
            units.release();
            return Err(QueueError::Terminated);
        }
        Ok(ticket)
    }
}
