//! Core systems for Crosswire.
//!
//! Crosswire is the coordination layer that lets asynchronous, often
//! cross-thread native events (network transfer progress, callback-thread
//! notifications, dialog completion callbacks) safely reach a
//! single-threaded, cooperative script interpreter without races,
//! use-after-free, or lost notifications. This crate provides the
//! foundations:
//!
//! - **Owner registry & weak handles**: liveness-checked references to
//!   script-visible objects that may be destroyed while notifications
//!   targeting them are still in flight
//! - **Pending tasks**: deferred notifications with an explicit two-phase
//!   dispatch/release contract
//! - **Event queue**: the multi-producer/single-consumer FIFO that hands
//!   tasks from arbitrary threads to the interpreter thread
//! - **Cooperative wait**: the bounded, reentrant polling primitive that
//!   lets a synchronous call block while queued tasks and host events keep
//!   being processed
//!
//! # Threading model
//!
//! One designated consumer thread runs the interpreter; any number of
//! producer threads post tasks concurrently. Only the consumer thread
//! dispatches tasks, resolves handles for delivery, or mutates
//! script-visible state. Posting a task transfers ownership of its payload
//! to the consumer.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use crosswire_core::{
//!     event_queue, owner_registry, wait_until, Message, MessageTarget,
//!     PendingTask, Value, WeakHandle,
//! };
//!
//! struct Document;
//! impl MessageTarget for Document {
//!     fn deliver(&self, message: &Message) {
//!         println!("{} {:?}", message.name(), message.args());
//!     }
//! }
//!
//! // Register a script-visible owner and hand its weak handle around.
//! let id = owner_registry().register(Arc::new(Document));
//! let handle = WeakHandle::new(id);
//!
//! // A producer thread posts a notification.
//! std::thread::spawn(move || {
//!     let message = Message::new("dialogDone", vec![Value::Text("ok".into())]);
//!     event_queue()
//!         .post(PendingTask::control_notification(handle, message))
//!         .ok();
//! });
//!
//! // The consumer drains cooperatively.
//! wait_until(|| event_queue().is_empty(), Duration::from_secs(1));
//! ```

mod error;
mod handle;
pub mod logging;
mod message;
mod pending;
mod queue;
pub mod thread_check;
mod wait;

pub use error::{CoreError, Result};
pub use handle::{OwnerId, OwnerRegistry, WeakHandle, owner_registry};
pub use message::{Message, MessageTarget, Value};
pub use pending::{PendingTask, TaskPayload, TransferPhase, URL_PROGRESS_MESSAGE};
pub use queue::{EventQueue, event_queue};
pub use wait::{
    HostEventPump, MAX_WAIT_DEPTH, WaitConfig, clear_host_event_pump, set_host_event_pump, wait,
    wait_depth, wait_until, wait_until_with_config, wait_with_config,
};

/// Initialize the runtime on the current thread.
///
/// Designates the calling thread as the consumer (interpreter) thread and
/// forces creation of the global owner registry and event queue. Call once
/// from the interpreter thread at startup; producers discovered later need
/// no initialization of their own.
pub fn init_runtime() {
    thread_check::set_consumer_thread();
    let _ = owner_registry();
    let _ = event_queue();
    tracing::debug!(target: "crosswire_core", "runtime initialized");
}

#[cfg(test)]
pub(crate) mod test_util {
    use parking_lot::{Mutex, MutexGuard};

    /// Tests touching the global event queue run serialized: the queue is
    /// process-wide state and interleaved tests would steal each other's
    /// tasks.
    static SERIAL: Mutex<()> = Mutex::new(());

    pub fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock()
    }
}
