//! Readiness barrier and start gate.
//!
//! The barrier is the one piece of state every instance mutates: each
//! worker arrives once after its setup succeeds, and the supervisor waits
//! for the full roster with a single deterministic timeout. The start gate
//! then releases all workers into `Running` at once, or aborts them if the
//! barrier failed.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Outcome of waiting for the full roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierWait {
    /// Everyone arrived in time.
    Complete,
    /// A worker failed during setup before arriving.
    Defected { workers: Vec<String> },
    /// The timeout elapsed; these workers never arrived.
    TimedOut { pending: Vec<String> },
}

struct BarrierState {
    arrived: HashSet<String>,
    defected: Vec<String>,
}

/// Counts worker arrivals against the full roster.
pub struct ReadyBarrier {
    roster: Vec<String>,
    state: Mutex<BarrierState>,
    changed: Condvar,
}

impl ReadyBarrier {
    pub fn new(roster: Vec<String>) -> Self {
        Self {
            roster,
            state: Mutex::new(BarrierState {
                arrived: HashSet::new(),
                defected: Vec::new(),
            }),
            changed: Condvar::new(),
        }
    }

    /// Marks one worker ready.
    pub fn arrive(&self, name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.arrived.insert(name.to_string());
        drop(state);
        self.changed.notify_all();
    }

    /// Marks one worker as failed during setup; wakes the supervisor
    /// immediately instead of letting it run into the timeout.
    pub fn defect(&self, name: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.defected.push(name.to_string());
        drop(state);
        self.changed.notify_all();
    }

    /// Waits until the whole roster arrived, a worker defected, or the
    /// timeout elapsed.
    pub fn wait_all(&self, timeout: Duration) -> BarrierWait {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if !state.defected.is_empty() {
                return BarrierWait::Defected {
                    workers: state.defected.clone(),
                };
            }
            if state.arrived.len() >= self.roster.len() {
                return BarrierWait::Complete;
            }
            let now = Instant::now();
            if now >= deadline {
                let pending = self
                    .roster
                    .iter()
                    .filter(|name| !state.arrived.contains(*name))
                    .cloned()
                    .collect();
                return BarrierWait::TimedOut { pending };
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }
}

/// The order released through the start gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOrder {
    /// Proceed to `Running`.
    Run,
    /// Tear down without running.
    Abort,
}

/// One-shot gate every worker blocks on after signaling readiness.
pub struct StartGate {
    order: Mutex<Option<StartOrder>>,
    opened: Condvar,
}

impl StartGate {
    pub fn new() -> Self {
        Self {
            order: Mutex::new(None),
            opened: Condvar::new(),
        }
    }

    /// Releases all waiting workers into `Running`.
    pub fn open(&self) {
        self.set(StartOrder::Run);
    }

    /// Releases all waiting workers into teardown.
    pub fn abort(&self) {
        self.set(StartOrder::Abort);
    }

    fn set(&self, order: StartOrder) {
        let mut guard = self.order.lock().unwrap_or_else(|e| e.into_inner());
        // First order wins; an abort after open (or vice versa) is ignored.
        if guard.is_none() {
            *guard = Some(order);
        }
        drop(guard);
        self.opened.notify_all();
    }

    /// Blocks until the gate is opened or aborted.
    pub fn wait(&self) -> StartOrder {
        let mut guard = self.order.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(order) = *guard {
                return order;
            }
            guard = self
                .opened
                .wait(guard)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}
