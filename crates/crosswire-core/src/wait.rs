//! The cooperative wait primitive.
//!
//! [`wait`] is the only suspension point in the system. It lets a
//! nominally synchronous call block the consumer thread while the system
//! keeps making progress: each iteration pumps the installed host event
//! pump, drains and dispatches the event queue, and then parks for a short
//! bounded slice on the queue's wake signal. There is no indefinite
//! OS-level parking - the slice bound keeps periodic re-checks and
//! housekeeping possible.
//!
//! Callers that need a synchronous result call [`wait_until`] with a
//! predicate over their own state (typically "my transfer reached a
//! terminal status") and an overall timeout.
//!
//! # Reentrancy
//!
//! Task handlers dispatched from inside a wait may themselves issue
//! synchronous calls and re-enter [`wait`]. That is supported - handlers
//! must be reentrant-safe and must not assume a flat call stack - but the
//! nesting is bounded by an explicit depth budget
//! ([`WaitConfig::max_depth`]) so that deeply nested synchronous calls
//! fail the innermost wait instead of growing the stack without bound.

use std::cell::Cell;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::queue::event_queue;

/// Default per-iteration park slice.
const DEFAULT_SLICE: Duration = Duration::from_millis(10);

/// Default maximum nesting depth for cooperative waits.
pub const MAX_WAIT_DEPTH: usize = 16;

/// Default number of tasks dispatched per wait iteration.
const DEFAULT_DISPATCH_BUDGET: usize = 64;

/// Tuning for the cooperative wait loop.
#[derive(Clone, Debug)]
pub struct WaitConfig {
    /// Maximum time one iteration parks waiting for a task.
    pub slice: Duration,
    /// Maximum wait nesting depth before the innermost wait gives up.
    pub max_depth: usize,
    /// Maximum tasks dispatched per iteration.
    pub dispatch_budget: usize,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            slice: DEFAULT_SLICE,
            max_depth: MAX_WAIT_DEPTH,
            dispatch_budget: DEFAULT_DISPATCH_BUDGET,
        }
    }
}

/// A hook for pumping pending host/OS events from inside a wait.
///
/// The embedder installs one with [`set_host_event_pump`] so that native
/// message processing (window events, dialog completion callbacks)
/// continues while a synchronous call blocks. `pump` must process only
/// already-pending events and return without blocking; it reports whether
/// it did any work.
pub trait HostEventPump: Send + Sync {
    /// Process pending host events. Returns `true` if any were processed.
    fn pump(&self) -> bool;
}

/// The installed host event pump, if any.
static HOST_PUMP: RwLock<Option<Box<dyn HostEventPump>>> = RwLock::new(None);

/// Install the host event pump used by [`wait`].
pub fn set_host_event_pump<P: HostEventPump + 'static>(pump: P) {
    *HOST_PUMP.write() = Some(Box::new(pump));
}

/// Remove the installed host event pump.
pub fn clear_host_event_pump() {
    *HOST_PUMP.write() = None;
}

fn pump_host_events() -> bool {
    match &*HOST_PUMP.read() {
        Some(pump) => pump.pump(),
        None => false,
    }
}

thread_local! {
    static WAIT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// The current wait nesting depth on this thread.
pub fn wait_depth() -> usize {
    WAIT_DEPTH.with(Cell::get)
}

struct DepthGuard;

impl DepthGuard {
    /// Enter one nesting level, or `None` if the budget is exhausted.
    fn enter(max_depth: usize) -> Option<Self> {
        WAIT_DEPTH.with(|depth| {
            if depth.get() >= max_depth {
                None
            } else {
                depth.set(depth.get() + 1);
                Some(Self)
            }
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        WAIT_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Block cooperatively for up to `timeout`.
///
/// Each iteration pumps host events, dispatches queued tasks (when
/// `allow_dispatch`), and parks briefly on the queue's wake signal.
/// Returns as soon as any work was done, or `true` ("timed out") once the
/// deadline passes with nothing processed.
///
/// `allow_reentrant` governs nested waits: when `false`, a wait entered
/// from inside another wait will pump host events but not dispatch tasks,
/// so handlers that cannot tolerate reentrant delivery can still block.
/// Exceeding the depth budget fails immediately, reported as a timeout.
pub fn wait(timeout: Duration, allow_dispatch: bool, allow_reentrant: bool) -> bool {
    wait_with_config(timeout, allow_dispatch, allow_reentrant, &WaitConfig::default())
}

/// [`wait`] with explicit tuning.
pub fn wait_with_config(
    timeout: Duration,
    allow_dispatch: bool,
    allow_reentrant: bool,
    config: &WaitConfig,
) -> bool {
    let Some(_guard) = DepthGuard::enter(config.max_depth) else {
        tracing::warn!(
            target: "crosswire_core::wait",
            max_depth = config.max_depth,
            "wait depth budget exhausted; refusing to nest further"
        );
        return true;
    };

    let nested = wait_depth() > 1;
    let can_dispatch = allow_dispatch && (allow_reentrant || !nested);
    let deadline = Instant::now() + timeout;
    let queue = event_queue();

    loop {
        let mut did_work = pump_host_events();
        if can_dispatch {
            did_work |= queue.dispatch_pending(config.dispatch_budget) > 0;
        }
        if did_work {
            return false;
        }

        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        let slice = config.slice.min(deadline - now);

        if can_dispatch {
            // Park on the wake signal; a freshly posted task is dispatched
            // immediately and counts as work done.
            if let Some(task) = queue.next_task(slice) {
                task.dispatch();
                return false;
            }
        } else {
            std::thread::sleep(slice);
        }
    }
}

/// Wait until `predicate` holds or `timeout` elapses.
///
/// The polling loop synchronous callers use: checks the predicate, runs
/// one cooperative iteration (pump + dispatch + bounded park), repeats.
/// Returns `true` if the predicate was satisfied, `false` on timeout or
/// an exhausted depth budget.
pub fn wait_until<F>(predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    wait_until_with_config(predicate, timeout, &WaitConfig::default())
}

/// [`wait_until`] with explicit tuning.
pub fn wait_until_with_config<F>(
    mut predicate: F,
    timeout: Duration,
    config: &WaitConfig,
) -> bool
where
    F: FnMut() -> bool,
{
    let Some(_guard) = DepthGuard::enter(config.max_depth) else {
        tracing::warn!(
            target: "crosswire_core::wait",
            max_depth = config.max_depth,
            "wait depth budget exhausted; abandoning wait_until"
        );
        return false;
    };

    let deadline = Instant::now() + timeout;
    let queue = event_queue();

    loop {
        if predicate() {
            return true;
        }

        pump_host_events();
        queue.dispatch_pending(config.dispatch_budget);

        if predicate() {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        let slice = config.slice.min(deadline - now);

        if let Some(task) = queue.next_task(slice) {
            task.dispatch();
        }
    }
}
