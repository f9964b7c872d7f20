use std::sync::{Condvar, Mutex};

use mq_core::{QueueError, Result};

struct SemState {
    tokens: usize,
    closed: bool,
}

/// Counting semaphore with a sticky close switch.
///
/// `close()` wakes every parked waiter; a waiter that finds the semaphore
/// closed with no tokens left reports [`QueueError::Shutdown`] instead of
/// parking again, which is what guarantees that shutdown unparks everyone in
/// bounded time. Tokens may still be posted and taken after closing; the
/// queue layer re-checks its own shutdown flag after every acquisition.
pub struct Semaphore {
    state: Mutex<SemState>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            state: Mutex::new(SemState {
                tokens: initial,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Takes a token without blocking. `Ok(false)` means the caller would
    /// have had to wait; this outcome is the block signal of the queue
    /// operations.
    pub fn try_acquire(&self) -> Result<bool> {
        let mut st = self.state.lock().map_err(|_| QueueError::LockError)?;
        if st.tokens > 0 {
            st.tokens -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Blocks until a token is available or the semaphore is closed.
    pub fn acquire(&self) -> Result<()> {
        let mut st = self.state.lock().map_err(|_| QueueError::LockError)?;
        st = self
            .cv
            .wait_while(st, |s| s.tokens == 0 && !s.closed)
            .map_err(|_| QueueError::LockError)?;
        if st.tokens > 0 {
            st.tokens -= 1;
            Ok(())
        } else {
            Err(QueueError::Shutdown)
        }
    }

    /// Returns one token and wakes one waiter.
    ///
    /// Recovers from a poisoned lock instead of failing: no caller code runs
    /// under this lock, so the counter is always internally consistent, and
    /// a post that gave up here would strand a committed buffer mutation
    /// behind a semaphore that never learns about it.
    pub fn post(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.tokens += 1;
        drop(st);
        self.cv.notify_one();
    }

    /// Closes the semaphore and wakes every waiter. Idempotent.
    ///
    /// Like [`Semaphore::post`] this recovers from a poisoned lock, so
    /// shutdown can always unpark every waiter.
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.closed = true;
        drop(st);
        self.cv.notify_all();
    }

    #[cfg(test)]
    pub fn tokens(&self) -> usize {
        self.state.lock().map(|st| st.tokens).unwrap_or(0)
    }
}
