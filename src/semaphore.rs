//! Counting semaphore built on a futex word.
//!
//! Permits live in a single `AtomicU32`. Acquiring is a CAS loop that parks on the word with
//! `FUTEX_WAIT` while it reads zero; releasing is an atomic add followed by `FUTEX_WAKE` when
//! waiters are registered. Release never locks or allocates, which makes it callable from a
//! signal handler. On targets without futexes the wait degrades to a 1ms poll.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub struct Semaphore {
    permits: AtomicU32,
    waiters: AtomicU32,
}

impl Semaphore {
    pub const fn new(permits: u32) -> Semaphore {
        Semaphore {
            permits: AtomicU32::new(permits),
            waiters: AtomicU32::new(0),
        }
    }

    /// Permits currently available (racy snapshot).
    pub fn available(&self) -> u32 {
        self.permits.load(Ordering::Acquire)
    }

    /// Take one permit if one is available, without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.permits.load(Ordering::SeqCst);
        while current > 0 {
            match self.permits.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Take one permit, parking until one is released.
    ///
    /// `keep_waiting` is consulted before every park and after every wake-up (including
    /// spurious and `EINTR` wake-ups). Once it returns `false` the call gives up without
    /// consuming a permit.
    ///
    /// # Returns
    /// `true` if a permit was taken, `false` if the wait was abandoned
    pub fn acquire(&self, keep_waiting: impl Fn() -> bool) -> bool {
        loop {
            if self.try_acquire() {
                return true;
            }
            if !keep_waiting() {
                return false;
            }

            self.waiters.fetch_add(1, Ordering::SeqCst);
            if self.permits.load(Ordering::SeqCst) == 0 && keep_waiting() {
                if futex::wait(&self.permits, 0).is_err() {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            self.waiters.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Return one permit and wake a parked waiter. Async-signal-safe.
    pub fn release(&self) {
        self.release_many(1);
    }

    /// Return `count` permits and wake up to `count` parked waiters. Async-signal-safe.
    pub fn release_many(&self, count: u32) {
        if count == 0 {
            return;
        }
        self.permits.fetch_add(count, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _ = futex::wake(&self.permits, count);
        }
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.permits.load(Ordering::Relaxed))
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(target_os = "linux")]
mod futex {
    use std::io;
    use std::sync::atomic::AtomicU32;

    /// Park while `*addr == expected`. `EAGAIN` and `EINTR` count as a wake-up.
    pub fn wait(addr: &AtomicU32, expected: u32) -> io::Result<()> {
        use libc::{syscall, timespec, SYS_futex, EAGAIN, EINTR, FUTEX_PRIVATE_FLAG, FUTEX_WAIT};

        let res = unsafe {
            syscall(
                SYS_futex,
                addr as *const AtomicU32 as *const u32,
                FUTEX_WAIT | FUTEX_PRIVATE_FLAG,
                expected,
                std::ptr::null::<timespec>(),
                std::ptr::null::<u32>(),
                0,
            )
        };
        if res == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == EAGAIN || code == EINTR => Ok(()),
            _ => Err(err),
        }
    }

    pub fn wake(addr: &AtomicU32, count: u32) -> io::Result<()> {
        use libc::{syscall, SYS_futex, FUTEX_PRIVATE_FLAG, FUTEX_WAKE};

        let count = count.min(i32::MAX as u32) as i32;
        let res = unsafe {
            syscall(
                SYS_futex,
                addr as *const AtomicU32 as *const u32,
                FUTEX_WAKE | FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<u32>(),
                std::ptr::null::<u32>(),
                0,
            )
        };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod futex {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    pub fn wait(addr: &AtomicU32, expected: u32) -> io::Result<()> {
        if addr.load(Ordering::SeqCst) == expected {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    pub fn wake(_addr: &AtomicU32, _count: u32) -> io::Result<()> {
        Ok(())
    }
}
