//! Wait/notify primitive for the per-stage worker loops.
//!
//! A worker blocks here while its inbound queue is empty, instead of
//! busy-polling. The data-ready flag is consumed by each successful wait;
//! the exit flag latches permanently so shutdown can never be missed, even
//! if the notification races with a wakeup for data.

use std::sync::{Condvar, Mutex};

#[derive(Default)]
struct State {
    ready: bool,
    exit: bool,
}

/// Condition-variable based data-ready / exit signal for one stage.
#[derive(Default)]
pub struct StageNotifier {
    state: Mutex<State>,
    cond: Condvar,
}

impl StageNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until notified. `already_polled` short-circuits the wait:
    /// a worker whose last poll succeeded goes straight back to the queue.
    ///
    /// Returns `false` once an exit notification has been observed.
    pub fn wait(&self, already_polled: bool) -> bool {
        if already_polled {
            return true;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while !state.ready {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        state.ready = false;
        !state.exit
    }

    /// Signal that data is ready, waking a blocked waiter if any.
    pub fn notify(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.ready = true;
        self.cond.notify_one();
    }

    /// Latch the exit flag and wake the waiter. Idempotent.
    pub fn notify_exit(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.exit = true;
        state.ready = true;
        self.cond.notify_one();
    }

    /// Whether an exit notification has been issued.
    pub fn exit_requested(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).exit
    }
}
