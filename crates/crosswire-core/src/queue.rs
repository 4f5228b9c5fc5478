//! The process-wide event queue.
//!
//! A multi-producer/single-consumer FIFO of [`PendingTask`]s. Producers -
//! transport callback threads, native dialog completion threads, any
//! context that is not the interpreter - post tasks from wherever they
//! are; the single consumer thread drains and dispatches them from its
//! main loop or from inside a cooperative wait.
//!
//! Ordering guarantee: two tasks posted by the same producer in order
//! A-then-B are dispatched in order A-then-B. Nothing is guaranteed about
//! interleaving across producers.
//!
//! Posting a task is a single-writer-then-handoff transfer: the producer
//! must not touch the task's payload after posting. Consumer-side
//! operations ([`EventQueue::drain_one`] and friends) are verified against
//! the registered consumer thread in debug builds.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::error::{CoreError, Result};
use crate::pending::PendingTask;
use crate::thread_check::is_consumer_thread;

/// Global event queue (lazily initialized).
static EVENT_QUEUE: OnceLock<EventQueue> = OnceLock::new();

/// Get the global event queue.
pub fn event_queue() -> &'static EventQueue {
    EVENT_QUEUE.get_or_init(EventQueue::new)
}

/// The multi-producer/single-consumer pending task queue.
///
/// Backed by an unbounded channel: `post` never blocks a producer beyond
/// the channel's short internal synchronization, and the channel's
/// receiver doubles as the consumer's wake signal (see
/// [`next_task`](Self::next_task)).
pub struct EventQueue {
    tx: Sender<PendingTask>,
    rx: Receiver<PendingTask>,
    closed: AtomicBool,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            closed: AtomicBool::new(false),
        }
    }

    /// Post a task to the tail of the queue. Callable from any thread.
    ///
    /// Wakes the consumer if it is parked in [`next_task`](Self::next_task).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::QueueClosed`] after [`close`](Self::close); the
    /// rejected task is dropped, which runs its release phase.
    pub fn post(&self, task: PendingTask) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(target: "crosswire_core::queue", "post after close; releasing task");
            return Err(CoreError::QueueClosed);
        }
        self.tx.send(task).map_err(|_| CoreError::QueueClosed)
    }

    /// Pop the task at the head of the queue, if any. Consumer thread only.
    pub fn drain_one(&self) -> Option<PendingTask> {
        debug_assert!(
            is_consumer_thread(),
            "EventQueue::drain_one called off the consumer thread"
        );
        self.rx.try_recv().ok()
    }

    /// Pop the head task, or park for up to `timeout` waiting for one.
    /// Consumer thread only.
    ///
    /// This is the bounded sleep-with-wake used by the cooperative wait:
    /// it returns early the moment a producer posts.
    pub fn next_task(&self, timeout: Duration) -> Option<PendingTask> {
        debug_assert!(
            is_consumer_thread(),
            "EventQueue::next_task called off the consumer thread"
        );
        self.rx.recv_timeout(timeout).ok()
    }

    /// Pop and dispatch the head task. Returns `false` if the queue was
    /// empty. Consumer thread only.
    pub fn dispatch_one(&self) -> bool {
        match self.drain_one() {
            Some(task) => {
                task.dispatch();
                true
            }
            None => false,
        }
    }

    /// Pop and dispatch up to `budget` tasks, or until the queue is empty.
    /// Returns the number dispatched. Consumer thread only.
    ///
    /// The budget bounds how long one main-loop tick can spend in dispatch
    /// when producers are posting faster than the consumer drains.
    pub fn dispatch_pending(&self, budget: usize) -> usize {
        let mut dispatched = 0;
        while dispatched < budget {
            if !self.dispatch_one() {
                break;
            }
            dispatched += 1;
        }
        if dispatched > 0 {
            tracing::trace!(target: "crosswire_core::queue", dispatched, "dispatched pending tasks");
        }
        dispatched
    }

    /// Drop every queued task without dispatching any.
    ///
    /// The shutdown path: undispatched tasks still run their release phase
    /// as they are dropped. Returns the number of tasks released.
    pub fn clear(&self) -> usize {
        let mut released = 0;
        while self.rx.try_recv().is_ok() {
            released += 1;
        }
        if released > 0 {
            tracing::debug!(target: "crosswire_core::queue", released, "cleared queue without dispatch");
        }
        released
    }

    /// Stop accepting new tasks. Already-queued tasks remain drainable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the queue has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The number of tasks currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{WeakHandle, owner_registry};
    use crate::message::{Message, MessageTarget, Value};
    use crate::pending::TransferPhase;
    use crate::test_util::serial;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<Message>>,
    }

    impl MessageTarget for Recorder {
        fn deliver(&self, message: &Message) {
            self.received.lock().push(message.clone());
        }
    }

    fn register_recorder() -> (Arc<Recorder>, WeakHandle) {
        let recorder = Arc::new(Recorder::default());
        let id = owner_registry().register(recorder.clone());
        (recorder, WeakHandle::new(id))
    }

    fn progress_task(handle: WeakHandle, url: &Arc<str>, amount: u64) -> PendingTask {
        PendingTask::transfer_progress(
            handle,
            url.clone(),
            TransferPhase::Loading { amount, total: -1 },
        )
    }

    #[test]
    fn test_post_and_drain_fifo() {
        let _guard = serial();
        let (recorder, handle) = register_recorder();
        let url: Arc<str> = Arc::from("http://x.test");

        for amount in 1..=3 {
            event_queue().post(progress_task(handle, &url, amount)).unwrap();
        }
        assert_eq!(event_queue().len(), 3);
        assert_eq!(event_queue().dispatch_pending(16), 3);
        assert!(event_queue().is_empty());

        let amounts: Vec<i64> = recorder
            .received
            .lock()
            .iter()
            .map(|m| m.arg(2).and_then(Value::as_int).unwrap())
            .collect();
        assert_eq!(amounts, vec![1, 2, 3]);
        owner_registry().destroy(handle.id());
    }

    #[test]
    fn test_dispatch_budget_is_honored() {
        let _guard = serial();
        let (_recorder, handle) = register_recorder();
        let url: Arc<str> = Arc::from("http://x.test");

        for amount in 0..10 {
            event_queue().post(progress_task(handle, &url, amount)).unwrap();
        }
        assert_eq!(event_queue().dispatch_pending(4), 4);
        assert_eq!(event_queue().len(), 6);
        assert_eq!(event_queue().dispatch_pending(usize::MAX), 6);
        owner_registry().destroy(handle.id());
    }

    #[test]
    fn test_per_producer_order_preserved() {
        let _guard = serial();
        let (recorder, handle) = register_recorder();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                std::thread::spawn(move || {
                    let url: Arc<str> = Arc::from(format!("http://producer-{p}.test"));
                    for seq in 0..25u64 {
                        event_queue()
                            .post(progress_task(handle, &url, seq))
                            .unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        while event_queue().dispatch_one() {}

        // Group the observed sequence numbers by producer url; each
        // producer's own ordering must survive the interleaving.
        let received = recorder.received.lock();
        assert_eq!(received.len(), 100);
        for p in 0..4 {
            let url = format!("http://producer-{p}.test");
            let seqs: Vec<i64> = received
                .iter()
                .filter(|m| m.arg(0).and_then(Value::as_text) == Some(url.as_str()))
                .map(|m| m.arg(2).and_then(Value::as_int).unwrap())
                .collect();
            assert_eq!(seqs, (0..25).collect::<Vec<i64>>());
        }
        drop(received);
        owner_registry().destroy(handle.id());
    }

    #[test]
    fn test_clear_releases_without_dispatch() {
        let _guard = serial();
        let (recorder, handle) = register_recorder();
        let url: Arc<str> = Arc::from("http://x.test");

        for amount in 0..5 {
            event_queue().post(progress_task(handle, &url, amount)).unwrap();
        }
        // One url reference per queued task, plus ours.
        assert_eq!(Arc::strong_count(&url), 6);

        assert_eq!(event_queue().clear(), 5);
        assert!(event_queue().is_empty());
        assert!(recorder.received.lock().is_empty());
        // Release ran for every cleared task.
        assert_eq!(Arc::strong_count(&url), 1);
        owner_registry().destroy(handle.id());
    }

    #[test]
    fn test_closed_queue_rejects_posts() {
        // A standalone instance: closing the global queue would affect
        // every other test in the process.
        let queue = EventQueue::new();
        let (_recorder, handle) = register_recorder();
        let url: Arc<str> = Arc::from("http://x.test");

        queue.post(progress_task(handle, &url, 1)).unwrap();
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(
            queue.post(progress_task(handle, &url, 2)),
            Err(CoreError::QueueClosed)
        );

        // Queued work survives the close and remains drainable.
        assert_eq!(queue.len(), 1);
        assert!(queue.drain_one().is_some());
        owner_registry().destroy(handle.id());
    }

    #[test]
    fn test_next_task_wakes_on_post() {
        let _guard = serial();
        let (_recorder, handle) = register_recorder();
        let url: Arc<str> = Arc::from("http://x.test");

        let producer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            event_queue().post(progress_task(handle, &url, 7)).unwrap();
        });

        // Generous timeout; the post should wake us long before it.
        let task = event_queue().next_task(Duration::from_secs(5));
        assert!(task.is_some());
        producer.join().unwrap();
        owner_registry().destroy(handle.id());
    }
}
