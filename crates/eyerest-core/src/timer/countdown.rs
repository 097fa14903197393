//! Cancellable periodic countdown.
//!
//! Every [`CountdownTimer`] owns one background worker thread for its whole
//! lifetime. `start` arms the worker, which then sleeps until each tick
//! deadline (`start + n * interval`) and reports the remaining time to the
//! registered [`CountdownListener`]. The terminal `finished` callback fires
//! exactly once per start, on the tick where the expected tick count is
//! reached or the remaining time hits zero.
//!
//! ## Cancellation
//!
//! A tick runs its callbacks while holding the timer's in-flight lock.
//! `cancel` bumps the cycle generation and then waits on that lock, so once
//! it returns no callback of the cancelled cycle is running or will run.
//! Calling `cancel`/`start` from inside a callback is allowed; the worker
//! detects that it is the caller and skips the wait.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::error::TimerError;

/// Receives the callbacks of one [`CountdownTimer`].
///
/// Callbacks run on the timer's worker thread and must not block on work
/// that itself waits for this timer to be cancelled.
pub trait CountdownListener: Send + Sync + 'static {
    /// Called on every tick with the time left, never negative.
    fn elapsed(&self, remaining: Duration);

    /// Called once when the countdown completes.
    fn finished(&self);
}

/// `ceil(total / interval)`, the number of ticks a full run produces.
pub fn expected_tick_count(total: Duration, interval: Duration) -> u64 {
    let interval = interval.as_nanos().max(1);
    let ticks = total.as_nanos().div_ceil(interval);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

#[derive(Debug)]
struct CycleState {
    running: bool,
    disposed: bool,
    /// Bumped by every start, cancel and dispose. A tick only fires if the
    /// generation it was scheduled under is still current.
    generation: u64,
    ticks: u64,
    started_at: Instant,
}

struct Shared {
    name: String,
    total: Duration,
    interval: Duration,
    expected_ticks: u64,
    state: Mutex<CycleState>,
    wake: Condvar,
    in_flight: Mutex<()>,
    listener: Arc<dyn CountdownListener>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_in_flight(&self) {
        drop(self.in_flight.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn deadline(&self, state: &CycleState) -> Instant {
        let offset = self.interval.as_nanos().saturating_mul(u128::from(state.ticks + 1));
        let offset = Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX));
        state.started_at + offset
    }

    fn fire(&self, generation: u64) {
        let _in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        let (remaining, done) = {
            let mut state = self.lock_state();
            if state.generation != generation || !state.running {
                return;
            }
            state.ticks += 1;
            let remaining = self.total.saturating_sub(state.started_at.elapsed());
            let done = state.ticks >= self.expected_ticks || remaining.is_zero();
            if done {
                state.running = false;
            }
            (remaining, done)
        };

        debug!(timer = %self.name, remaining_ms = remaining.as_millis() as u64, "tick");
        self.notify("elapsed", |listener| listener.elapsed(remaining));

        // A cancel or restart issued from inside `elapsed` supersedes this cycle.
        if done && self.lock_state().generation == generation {
            self.notify("finished", |listener| listener.finished());
        }
    }

    fn notify(&self, callback: &str, f: impl FnOnce(&dyn CountdownListener)) {
        let listener = self.listener.as_ref();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(listener))) {
            error!(
                timer = %self.name,
                callback,
                "countdown listener panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}

fn run_worker(shared: Arc<Shared>) {
    let mut state = shared.lock_state();
    loop {
        while !state.running && !state.disposed {
            state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.disposed {
            return;
        }

        let generation = state.generation;
        let deadline = shared.deadline(&state);
        let due = loop {
            if state.disposed || !state.running || state.generation != generation {
                break false;
            }
            let now = Instant::now();
            if now >= deadline {
                break true;
            }
            state = shared
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        };
        if !due {
            continue;
        }

        drop(state);
        shared.fire(generation);
        state = shared.lock_state();
    }
}

/// A cancellable, periodic, one-shot-overall countdown.
pub struct CountdownTimer {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl CountdownTimer {
    /// Create an idle timer and its worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidDuration`] if `total` or `interval` is
    /// zero, and [`TimerError::Spawn`] if the worker cannot be started.
    pub fn new(
        name: impl Into<String>,
        total: Duration,
        interval: Duration,
        listener: impl CountdownListener,
    ) -> Result<Self, TimerError> {
        if total.is_zero() {
            return Err(TimerError::InvalidDuration {
                name: "total",
                value: total,
            });
        }
        if interval.is_zero() {
            return Err(TimerError::InvalidDuration {
                name: "interval",
                value: interval,
            });
        }

        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            total,
            interval,
            expected_ticks: expected_tick_count(total, interval),
            state: Mutex::new(CycleState {
                running: false,
                disposed: false,
                generation: 0,
                ticks: 0,
                started_at: Instant::now(),
            }),
            wake: Condvar::new(),
            in_flight: Mutex::new(()),
            listener: Arc::new(listener),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("countdown-{name}"))
            .spawn(move || run_worker(worker_shared))
            .map_err(TimerError::Spawn)?;
        let worker_id = worker.thread().id();

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn total(&self) -> Duration {
        self.shared.total
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn expected_tick_count(&self) -> u64 {
        self.shared.expected_ticks
    }

    /// Ticks delivered in the current (or last) cycle.
    pub fn tick_count(&self) -> u64 {
        self.shared.lock_state().ticks
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_state().running
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Start a fresh cycle from now. A running cycle is cancelled first.
    pub fn start(&self) {
        self.cancel();

        let mut state = self.shared.lock_state();
        if state.disposed {
            warn!(timer = %self.shared.name, "start ignored on disposed timer");
            return;
        }
        state.generation += 1;
        state.running = true;
        state.ticks = 0;
        state.started_at = Instant::now();
        self.shared.wake.notify_all();
    }

    /// Stop the current cycle. Idempotent.
    ///
    /// Blocks until a tick that is already delivering callbacks has returned,
    /// unless called from one of those callbacks.
    pub fn cancel(&self) {
        {
            let mut state = self.shared.lock_state();
            state.running = false;
            state.generation += 1;
            self.shared.wake.notify_all();
        }
        if !self.on_worker() {
            self.shared.wait_in_flight();
        }
    }

    pub fn restart(&self) {
        self.cancel();
        self.start();
    }

    /// Cancel and release the worker thread. Safe to call repeatedly.
    pub fn dispose(&self) {
        {
            let mut state = self.shared.lock_state();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.running = false;
            state.generation += 1;
            self.shared.wake.notify_all();
        }
        if self.on_worker() {
            return;
        }
        self.shared.wait_in_flight();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!(timer = %self.shared.name, "countdown worker panicked");
            }
        }
    }

    fn on_worker(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for CountdownTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CountdownTimer")
            .field("name", &self.shared.name)
            .field("total", &self.shared.total)
            .field("interval", &self.shared.interval)
            .field("state", &*self.shared.lock_state())
            .finish()
    }
}
