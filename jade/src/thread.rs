use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::monitor::{Monitor, MonitorError};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an interpreter instance.
/// This is distinct from the host's thread id, since an interpreter instance could be moved
/// between host threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(u64);
impl ThreadId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}
impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}

/// The part of an interpreter instance that other threads may touch
#[derive(Debug)]
pub struct ThreadHandle {
    id: ThreadId,
    name: String,
    interrupted: AtomicBool,
    /// The monitor this thread is in the wait-set of, so an interrupt can wake it
    waiting_on: Mutex<Option<Arc<Monitor>>>,
    sleep_lock: Mutex<()>,
    sleep_wake: Condvar,
}
impl ThreadHandle {
    #[must_use]
    pub fn new(name: &str) -> ThreadHandle {
        ThreadHandle {
            id: ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.to_owned(),
            interrupted: AtomicBool::new(false),
            waiting_on: Mutex::new(None),
            sleep_lock: Mutex::new(()),
            sleep_wake: Condvar::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the interrupt flag and wake the thread if it is blocked in `wait` or `sleep`
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);

        let monitor = self.waiting_on.lock().clone();
        if let Some(monitor) = monitor {
            monitor.wake_waiters();
        }

        let _guard = self.sleep_lock.lock();
        self.sleep_wake.notify_all();
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Get and clear the interrupt flag, what `Thread.interrupted()` does
    pub fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn set_waiting_on(&self, monitor: Option<Arc<Monitor>>) {
        *self.waiting_on.lock() = monitor;
    }

    /// Sleep for the duration unless interrupted first.
    /// An interrupt consumes the flag.
    pub fn sleep(&self, duration: Duration) -> Result<(), MonitorError> {
        let deadline = Instant::now() + duration;
        let mut guard = self.sleep_lock.lock();
        loop {
            if self.take_interrupt() {
                return Err(MonitorError::Interrupted);
            }

            if self.sleep_wake.wait_until(&mut guard, deadline).timed_out() {
                // An interrupt that raced with the timeout still counts
                return if self.take_interrupt() {
                    Err(MonitorError::Interrupted)
                } else {
                    Ok(())
                };
            }
        }
    }
}
