//! TimeoutGuard - single-shot "do X, then wait for success or expiry"
//!
//! A guard runs a caller-supplied action and then guarantees that exactly one
//! terminal callback fires for that arm cycle: `on_success` when the caller
//! declares success via [`TimeoutGuard::succeed`], or `on_timeout` when the
//! deadline elapses first.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──perform_with_deadline──▶ Armed ──succeed()────▶ Resolved
//!                                     │                      ▲
//!                                     └──deadline expiry─────┘
//!   Resolved ──perform_with_deadline──▶ Armed   (next cycle)
//! ```
//!
//! Dropping a guard while it is armed resolves that cycle as a timeout on the
//! dropping thread.
//!
//! Both resolution paths go through the same mutex-guarded state check, so a
//! success signal arriving on a driver thread and a timer firing on a runtime
//! worker can never both win. Callbacks always run after the lock is released.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Terminal callback run at most once per arm cycle
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised by the guard itself
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Guard is already armed (cycle {cycle} still in flight)")]
    AlreadyArmed { cycle: u64 },

    #[error("No tokio runtime available to drive the deadline timer")]
    NoRuntime,
}

/// Lifecycle state of a guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Never armed
    Idle,
    /// Waiting for success or expiry
    Armed,
    /// Terminal outcome decided for the current cycle
    Resolved,
}

struct GuardInner {
    state: GuardState,
    cycle: u64,
    timer: Option<JoinHandle<()>>,
    on_success: Option<Callback>,
    on_timeout: Option<Callback>,
}

impl GuardInner {
    fn resolve(&mut self) {
        self.state = GuardState::Resolved;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Timeout-guarded single-shot completion primitive
///
/// One guard carries exactly one in-flight cycle. Callers that need
/// concurrent exchanges create one guard per exchange.
pub struct TimeoutGuard {
    inner: Arc<Mutex<GuardInner>>,
    runtime: Handle,
}

fn lock(inner: &Mutex<GuardInner>) -> MutexGuard<'_, GuardInner> {
    // Callbacks never run under the lock, so a poisoned mutex still holds consistent state
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TimeoutGuard {
    /// Create a guard driven by the current tokio runtime
    pub fn new() -> Result<Self, GuardError> {
        let runtime = Handle::try_current().map_err(|_| GuardError::NoRuntime)?;
        Ok(Self::with_runtime(runtime))
    }

    /// Create a guard whose deadline timers are spawned on `runtime`
    pub fn with_runtime(runtime: Handle) -> Self {
        debug!("TimeoutGuard::with_runtime: called");
        Self {
            inner: Arc::new(Mutex::new(GuardInner {
                state: GuardState::Idle,
                cycle: 0,
                timer: None,
                on_success: None,
                on_timeout: None,
            })),
            runtime,
        }
    }

    /// Arm the guard, then run `action`
    ///
    /// The deadline timer is started before `action` runs, and the lock is
    /// released first so the action may resolve the cycle synchronously.
    /// If `action` fails the cycle is disarmed without firing either
    /// callback and the error is returned. Returns the new cycle number.
    ///
    /// The cycle is armed while `action` runs, so a `succeed()` from another
    /// thread in that window resolves it. If `action` then fails, `on_success`
    /// has already run and the error is still returned.
    pub fn perform_with_deadline<A, E, S, T>(
        &self,
        action: A,
        deadline: Duration,
        on_success: S,
        on_timeout: T,
    ) -> Result<u64, E>
    where
        A: FnOnce() -> Result<(), E>,
        E: From<GuardError>,
        S: FnOnce() + Send + 'static,
        T: FnOnce() + Send + 'static,
    {
        debug!(?deadline, "TimeoutGuard::perform_with_deadline: called");
        let cycle = {
            let mut inner = lock(&self.inner);
            if inner.state == GuardState::Armed {
                warn!(cycle = inner.cycle, "TimeoutGuard: rejecting re-arm while armed");
                return Err(GuardError::AlreadyArmed { cycle: inner.cycle }.into());
            }

            inner.cycle += 1;
            let cycle = inner.cycle;
            inner.state = GuardState::Armed;
            inner.on_success = Some(Box::new(on_success));
            inner.on_timeout = Some(Box::new(on_timeout));

            let weak = Arc::downgrade(&self.inner);
            inner.timer = Some(self.runtime.spawn(async move {
                tokio::time::sleep(deadline).await;
                expire(&weak, cycle);
            }));
            cycle
        };

        debug!(cycle, "TimeoutGuard::perform_with_deadline: armed, running action");
        if let Err(e) = action() {
            warn!(cycle, "TimeoutGuard: action failed, disarming");
            self.disarm(cycle);
            return Err(e);
        }

        Ok(cycle)
    }

    /// Declare success for the armed cycle
    ///
    /// Cancels the deadline timer and runs `on_success` on the caller's
    /// thread. Returns `false` without side effects when nothing is armed.
    pub fn succeed(&self) -> bool {
        let (cycle, on_success) = {
            let mut inner = lock(&self.inner);
            if inner.state != GuardState::Armed {
                debug!(state = ?inner.state, "TimeoutGuard::succeed: not armed, ignoring");
                return false;
            }
            inner.resolve();
            inner.on_timeout = None;
            (inner.cycle, inner.on_success.take())
        };

        debug!(cycle, "TimeoutGuard::succeed: resolved");
        if let Some(callback) = on_success {
            callback();
        }
        true
    }

    /// Current lifecycle state
    pub fn state(&self) -> GuardState {
        lock(&self.inner).state
    }

    /// Whether a cycle is in flight
    pub fn is_armed(&self) -> bool {
        self.state() == GuardState::Armed
    }

    /// Number of the most recently armed cycle (0 before the first arm)
    pub fn cycle(&self) -> u64 {
        lock(&self.inner).cycle
    }

    fn disarm(&self, cycle: u64) {
        let mut inner = lock(&self.inner);
        if inner.state == GuardState::Armed && inner.cycle == cycle {
            inner.resolve();
            inner.on_success = None;
            inner.on_timeout = None;
        }
    }
}

impl Drop for TimeoutGuard {
    /// An armed cycle is resolved as a timeout so it still gets its one outcome
    fn drop(&mut self) {
        let on_timeout = {
            let mut inner = lock(&self.inner);
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            if inner.state != GuardState::Armed {
                return;
            }
            inner.state = GuardState::Resolved;
            inner.on_success = None;
            inner.on_timeout.take()
        };

        warn!("TimeoutGuard: dropped while armed, resolving as timeout");
        if let Some(callback) = on_timeout {
            callback();
        }
    }
}

fn expire(inner: &Weak<Mutex<GuardInner>>, cycle: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let on_timeout = {
        let mut inner = lock(&inner);
        // The abort in succeed() can lose the race with a timer that already woke up
        if inner.state != GuardState::Armed || inner.cycle != cycle {
            debug!(cycle, current = inner.cycle, "TimeoutGuard: stale expiry ignored");
            return;
        }
        inner.state = GuardState::Resolved;
        inner.timer = None;
        inner.on_success = None;
        inner.on_timeout.take()
    };

    warn!(cycle, "TimeoutGuard: deadline expired");
    if let Some(callback) = on_timeout {
        callback();
    }
}
