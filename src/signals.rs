//! OS interrupt wiring.
//!
//! SIGINT and SIGTERM are routed into [`ShutdownCoordinator::interrupt`]. The handler only
//! loads an atomic pointer and calls that method, which is itself limited to atomics,
//! semaphore releases and a raw `write(2)`.
//!
//! Handlers are installed without `SA_RESTART`: a worker parked in `futex(2)` sees `EINTR`,
//! re-checks the shutdown flag and leaves instead of resuming the wait.

use crate::shutdown::ShutdownCoordinator;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

/// Coordinator the handler forwards to. Populated from `Arc::into_raw` and never freed: a
/// handler running on another thread may still hold a pointer loaded before a re-install.
static COORDINATOR: AtomicPtr<ShutdownCoordinator> = AtomicPtr::new(ptr::null_mut());

/// Route SIGINT and SIGTERM to `coordinator`.
///
/// Installing again replaces the target; the previous coordinator stays alive.
///
/// # Errors
/// The OS error if a handler cannot be installed.
pub fn install(coordinator: &Arc<ShutdownCoordinator>) -> io::Result<()> {
    let raw = Arc::into_raw(Arc::clone(coordinator)) as *mut ShutdownCoordinator;
    COORDINATOR.store(raw, Ordering::Release);
    platform::install()?;
    log::debug!("interrupt handlers installed");
    Ok(())
}

/// Put the default disposition back for SIGINT and SIGTERM.
///
/// # Errors
/// The OS error if a disposition cannot be reset.
pub fn restore_default() -> io::Result<()> {
    platform::restore_default()?;
    COORDINATOR.store(ptr::null_mut(), Ordering::Release);
    Ok(())
}

fn forward_interrupt() {
    let coordinator = COORDINATOR.load(Ordering::Acquire);
    // SAFETY: non-null values come from `Arc::into_raw` and are never released.
    if let Some(coordinator) = unsafe { coordinator.as_ref() } {
        coordinator.interrupt();
    }
}

#[cfg(unix)]
mod platform {
    use std::io;
    use std::mem;
    use std::ptr;

    const SIGNALS: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];

    extern "C" fn on_signal(_signum: libc::c_int) {
        preserving_errno(super::forward_interrupt);
    }

    /// Run `f` and put `errno` back afterwards; the interrupted code must not see it change.
    fn preserving_errno(f: impl FnOnce()) {
        let saved = errno::get();
        f();
        errno::set(saved);
    }

    mod errno {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        unsafe fn location() -> *mut libc::c_int {
            libc::__errno_location()
        }

        #[cfg(any(
            target_os = "macos",
            target_os = "ios",
            target_os = "freebsd",
            target_os = "dragonfly"
        ))]
        unsafe fn location() -> *mut libc::c_int {
            libc::__error()
        }

        #[cfg(any(
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "solaris",
            target_os = "illumos"
        ))]
        unsafe fn location() -> *mut libc::c_int {
            libc::__errno()
        }

        pub(super) fn get() -> libc::c_int {
            unsafe { *location() }
        }

        pub(super) fn set(value: libc::c_int) {
            unsafe { *location() = value }
        }
    }

    pub(super) fn install() -> io::Result<()> {
        let handler = on_signal as extern "C" fn(libc::c_int);
        for signum in SIGNALS {
            set_disposition(signum, handler as libc::sighandler_t)?;
        }
        Ok(())
    }

    pub(super) fn restore_default() -> io::Result<()> {
        for signum in SIGNALS {
            set_disposition(signum, libc::SIG_DFL)?;
        }
        Ok(())
    }

    fn set_disposition(signum: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = handler;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signum, &action, ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

}

#[cfg(not(unix))]
mod platform {
    use std::io;
    use std::sync::Once;

    static INSTALLED: Once = Once::new();

    // ctrlc can only register once per process; later installs just retarget COORDINATOR.
    pub(super) fn install() -> io::Result<()> {
        let mut result = Ok(());
        INSTALLED.call_once(|| {
            result = ctrlc::set_handler(super::forward_interrupt)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        });
        result
    }

    pub(super) fn restore_default() -> io::Result<()> {
        Ok(())
    }
}
