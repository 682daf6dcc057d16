//! Intrinsic locks: reentrant mutual exclusion plus a wait-set, one per object that has ever been
//! locked.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

use crate::thread::{ThreadHandle, ThreadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorError {
    /// The calling thread does not own the monitor.
    /// Becomes `IllegalMonitorStateException`
    NotOwner,
    /// The thread was interrupted while waiting.
    /// Becomes `InterruptedException`
    Interrupted,
}

#[derive(Debug, Default)]
struct MonitorState {
    owner: Option<ThreadId>,
    /// Reentrancy count, zero exactly when there is no owner
    count: u32,
    /// Tickets of the threads in the wait-set, in the order they started waiting
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

#[derive(Debug, Default)]
pub struct Monitor {
    state: Mutex<MonitorState>,
    /// Signalled when the monitor is released
    available: Condvar,
    /// Signalled when waiters are notified or interrupted
    notified: Condvar,
}
impl Monitor {
    #[must_use]
    pub fn new() -> Monitor {
        Monitor::default()
    }

    /// Acquire the monitor, blocking while another thread owns it
    pub fn lock(&self, thread: ThreadId) {
        let mut state = self.state.lock();
        if state.owner == Some(thread) {
            state.count += 1;
            return;
        }

        while state.owner.is_some() {
            self.available.wait(&mut state);
        }
        state.owner = Some(thread);
        state.count = 1;
    }

    /// Acquire the monitor only if that can be done without blocking
    pub fn try_lock(&self, thread: ThreadId) -> bool {
        let mut state = self.state.lock();
        match state.owner {
            Some(owner) if owner == thread => {
                state.count += 1;
                true
            }
            Some(_) => false,
            None => {
                state.owner = Some(thread);
                state.count = 1;
                true
            }
        }
    }

    pub fn unlock(&self, thread: ThreadId) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        if state.owner != Some(thread) {
            return Err(MonitorError::NotOwner);
        }

        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            self.available.notify_one();
        }
        Ok(())
    }

    #[must_use]
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    #[must_use]
    pub fn is_owned_by(&self, thread: ThreadId) -> bool {
        self.owner() == Some(thread)
    }

    /// Release the monitor entirely, wait to be notified, and then reacquire it with the same
    /// reentrancy count.
    /// `None` waits without a timeout.
    pub fn wait(
        self: &Arc<Self>,
        thread: &ThreadHandle,
        timeout: Option<Duration>,
    ) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        if state.owner != Some(thread.id()) {
            return Err(MonitorError::NotOwner);
        }

        if thread.take_interrupt() {
            return Err(MonitorError::Interrupted);
        }

        let count = state.count;
        state.owner = None;
        state.count = 0;
        self.available.notify_one();

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);
        thread.set_waiting_on(Some(Arc::clone(self)));

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut interrupted = false;
        loop {
            if !state.waiters.contains(&ticket) {
                // Notified
                break;
            }

            if thread.is_interrupted() {
                interrupted = true;
                state.waiters.retain(|x| *x != ticket);
                break;
            }

            match deadline {
                Some(deadline) => {
                    if self.notified.wait_until(&mut state, deadline).timed_out() {
                        state.waiters.retain(|x| *x != ticket);
                        break;
                    }
                }
                None => self.notified.wait(&mut state),
            }
        }

        thread.set_waiting_on(None);

        while state.owner.is_some() {
            self.available.wait(&mut state);
        }
        state.owner = Some(thread.id());
        state.count = count;

        if interrupted {
            thread.take_interrupt();
            return Err(MonitorError::Interrupted);
        }

        Ok(())
    }

    /// Wake the longest waiting thread, if there is one
    pub fn notify(&self, thread: ThreadId) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        if state.owner != Some(thread) {
            return Err(MonitorError::NotOwner);
        }

        if state.waiters.pop_front().is_some() {
            self.notified.notify_all();
        }
        Ok(())
    }

    pub fn notify_all(&self, thread: ThreadId) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        if state.owner != Some(thread) {
            return Err(MonitorError::NotOwner);
        }

        if !state.waiters.is_empty() {
            state.waiters.clear();
            self.notified.notify_all();
        }
        Ok(())
    }

    /// Wake every waiter so that they recheck their interrupt flag
    pub(crate) fn wake_waiters(&self) {
        let _state = self.state.lock();
        self.notified.notify_all();
    }
}
