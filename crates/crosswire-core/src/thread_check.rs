//! Consumer-thread verification utilities.
//!
//! Crosswire designates exactly one thread - the interpreter thread - as
//! the consumer of the event queue. Only that thread may dispatch pending
//! tasks, resolve handles for delivery, or mutate script-visible state.
//! This module records the designated thread and provides the assertions
//! the queue and dispatch paths use to verify affinity.
//!
//! The consumer thread is registered by the embedder at startup via
//! [`set_consumer_thread`] (called automatically by
//! [`crate::init_runtime`]). Before registration the checks degrade
//! gracefully and report every thread as the consumer, so early
//! initialization and test harnesses are unaffected.

use std::sync::OnceLock;
use std::thread::ThreadId;

/// Global storage for the consumer thread ID.
static CONSUMER_THREAD_ID: OnceLock<ThreadId> = OnceLock::new();

/// Register the current thread as the designated consumer thread.
///
/// Should be called once, from the interpreter thread, at startup.
///
/// # Panics
///
/// Panics if called again from a different thread.
pub fn set_consumer_thread() {
    let current = std::thread::current().id();
    if CONSUMER_THREAD_ID.set(current).is_err() && CONSUMER_THREAD_ID.get() != Some(&current) {
        panic!(
            "set_consumer_thread() called from a different thread than the \
             original. The consumer thread can only be designated once."
        );
    }
}

/// Get the consumer thread ID, if one has been registered.
#[inline]
pub fn consumer_thread_id() -> Option<ThreadId> {
    CONSUMER_THREAD_ID.get().copied()
}

/// Check if the current thread is the designated consumer thread.
///
/// Returns `true` when no consumer thread has been registered yet
/// (graceful fallback for early initialization).
#[inline]
pub fn is_consumer_thread() -> bool {
    match CONSUMER_THREAD_ID.get() {
        Some(&id) => std::thread::current().id() == id,
        None => true,
    }
}

/// Panics if the current thread is not the consumer thread.
///
/// Use for operations whose correctness depends on consumer-thread
/// affinity even in release builds. For hot paths prefer
/// `debug_assert!(is_consumer_thread(), ...)`.
#[inline]
pub fn assert_consumer_thread(operation: &str) {
    if !is_consumer_thread() {
        panic_not_consumer_thread(operation);
    }
}

#[cold]
#[inline(never)]
fn panic_not_consumer_thread(operation: &str) -> ! {
    let current = std::thread::current();
    panic!(
        "{operation} must run on the consumer (interpreter) thread; called from \
         thread \"{}\" ({:?}). Post a task to the event queue instead of \
         touching interpreter state from a producer thread.",
        current.name().unwrap_or("<unnamed>"),
        current.id(),
    )
}
