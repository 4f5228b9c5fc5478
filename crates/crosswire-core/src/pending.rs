//! Pending tasks: deferred notifications with a two-phase contract.
//!
//! A [`PendingTask`] is the unit of work a producer context posts to the
//! event queue. It carries a [`WeakHandle`] to the owner it targets plus
//! enough payload to reconstruct the notification message. The contract
//! has two phases:
//!
//! - **Dispatch** ([`PendingTask::dispatch`]) runs on the consumer thread
//!   and may be skipped entirely - if the owner was destroyed before the
//!   task reached the front of the queue, dispatch silently drops it.
//!   That silent drop is the expected resolution of a legitimate race,
//!   not an error.
//! - **Release** frees the payload and always runs exactly once, whether
//!   or not dispatch ran. In Rust the release phase is simply `Drop`, so
//!   ownership discipline provides the exactly-once guarantee: dispatch
//!   consumes the task, and an undispatched task (cleared queue, dead
//!   owner) releases when dropped.
//!
//! The task variants form a closed set consumed by a single match in
//! [`TaskPayload::into_message`], so the dispatcher is exhaustively
//! checked at compile time.

use std::sync::Arc;

use static_assertions::assert_impl_all;

use crate::handle::WeakHandle;
use crate::message::{Message, Value};

/// Message name used for transfer progress notifications.
pub const URL_PROGRESS_MESSAGE: &str = "urlProgress";

/// The reported phase of a transfer, as carried by a progress task.
///
/// This is the delivery-side projection of the transfer state machine:
/// each phase maps to one `urlProgress` message shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferPhase {
    /// The transport has been contacted.
    Contacted,
    /// The request has been negotiated with the remote end.
    Requested,
    /// Request body bytes are being sent.
    Uploading {
        /// Bytes sent so far.
        sent: u64,
        /// Total bytes to send, or -1 if unknown.
        total: i64,
    },
    /// The request body has been fully sent.
    Uploaded,
    /// Response bytes are arriving.
    Loading {
        /// Bytes received so far.
        amount: u64,
        /// Declared total, or -1 if not yet negotiated.
        total: i64,
    },
    /// The transfer completed successfully.
    Downloaded,
    /// The transfer failed.
    Failed {
        /// The transport's error message.
        message: String,
    },
}

/// The payload of a pending task.
///
/// A closed tagged union: every notification kind the system posts is one
/// of these variants, and [`into_message`](Self::into_message) is the
/// single dispatcher over them.
#[derive(Clone, Debug)]
pub enum TaskPayload {
    /// A progress notification for an in-flight transfer.
    TransferProgress {
        /// The transfer's url (shared across all of one operation's tasks).
        url: Arc<str>,
        /// The reported phase.
        phase: TransferPhase,
    },
    /// Successful completion of an asynchronous load, carrying the data.
    TransferFinished {
        /// The caller-chosen completion message name.
        message: String,
        /// The transfer's url.
        url: Arc<str>,
        /// The complete downloaded payload.
        data: Vec<u8>,
    },
    /// Failed completion of an asynchronous load.
    TransferError {
        /// The caller-chosen completion message name.
        message: String,
        /// The transfer's url.
        url: Arc<str>,
        /// The transport's error message.
        error: String,
    },
    /// A native-control notification, delivered verbatim.
    ControlNotification {
        /// The message to deliver.
        message: Message,
    },
    /// A property value produced asynchronously by a platform component.
    PropertyAvailable {
        /// The message name to deliver under.
        message: String,
        /// The property's name.
        property: String,
        /// The property's value.
        value: Value,
    },
}

impl TaskPayload {
    /// Synthesize the message this payload delivers.
    ///
    /// Loading progress with an unknown total (-1) reports the total as 0:
    /// receivers treat a zero total as indeterminate.
    pub fn into_message(self) -> Message {
        match self {
            Self::TransferProgress { url, phase } => {
                let url = Value::Text(url.as_ref().to_owned());
                let args = match phase {
                    TransferPhase::Contacted => vec![url, "contacted".into()],
                    TransferPhase::Requested => vec![url, "requested".into()],
                    TransferPhase::Uploading { sent, total } => {
                        vec![url, "uploading".into(), Value::Int(sent as i64), Value::Int(total)]
                    }
                    TransferPhase::Uploaded => vec![url, "uploaded".into()],
                    TransferPhase::Loading { amount, total } => vec![
                        url,
                        "loading".into(),
                        Value::Int(amount as i64),
                        Value::Int(total.max(0)),
                    ],
                    TransferPhase::Downloaded => vec![url, "downloaded".into()],
                    TransferPhase::Failed { message } => {
                        vec![url, "error".into(), Value::Text(message)]
                    }
                };
                Message::new(URL_PROGRESS_MESSAGE, args)
            }
            Self::TransferFinished { message, url, data } => {
                let len = data.len() as i64;
                Message::new(
                    message,
                    vec![
                        Value::Text(url.as_ref().to_owned()),
                        "downloaded".into(),
                        Value::Bytes(data),
                        Value::Int(len),
                    ],
                )
            }
            Self::TransferError { message, url, error } => Message::new(
                message,
                vec![
                    Value::Text(url.as_ref().to_owned()),
                    "error".into(),
                    Value::Text(error),
                ],
            ),
            Self::ControlNotification { message } => message,
            Self::PropertyAvailable {
                message,
                property,
                value,
            } => Message::new(message, vec![Value::Text(property), value]),
        }
    }
}

/// A unit of deferred work posted to the event queue.
///
/// Deliberately not `Clone`: a task is consumed exactly once, either by
/// dispatch or by being dropped unprocessed.
#[derive(Debug)]
pub struct PendingTask {
    target: WeakHandle,
    payload: TaskPayload,
}

assert_impl_all!(PendingTask: Send);

impl PendingTask {
    /// Create a task from a target handle and payload.
    pub fn new(target: WeakHandle, payload: TaskPayload) -> Self {
        Self { target, payload }
    }

    /// Create a transfer progress task.
    pub fn transfer_progress(target: WeakHandle, url: Arc<str>, phase: TransferPhase) -> Self {
        Self::new(target, TaskPayload::TransferProgress { url, phase })
    }

    /// Create a transfer completion task carrying the downloaded data.
    pub fn transfer_finished(
        target: WeakHandle,
        message: impl Into<String>,
        url: Arc<str>,
        data: Vec<u8>,
    ) -> Self {
        Self::new(
            target,
            TaskPayload::TransferFinished {
                message: message.into(),
                url,
                data,
            },
        )
    }

    /// Create a transfer failure completion task.
    pub fn transfer_error(
        target: WeakHandle,
        message: impl Into<String>,
        url: Arc<str>,
        error: impl Into<String>,
    ) -> Self {
        Self::new(
            target,
            TaskPayload::TransferError {
                message: message.into(),
                url,
                error: error.into(),
            },
        )
    }

    /// Create a native-control notification task.
    pub fn control_notification(target: WeakHandle, message: Message) -> Self {
        Self::new(target, TaskPayload::ControlNotification { message })
    }

    /// Create an asynchronous property-available task.
    pub fn property_available(
        target: WeakHandle,
        message: impl Into<String>,
        property: impl Into<String>,
        value: Value,
    ) -> Self {
        Self::new(
            target,
            TaskPayload::PropertyAvailable {
                message: message.into(),
                property: property.into(),
                value,
            },
        )
    }

    /// The handle this task targets.
    pub fn target(&self) -> WeakHandle {
        self.target
    }

    /// The payload this task carries.
    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    /// Run the dispatch phase of this task.
    ///
    /// Consumer thread only. Resolves the target handle at the point of
    /// use; if the owner is gone the task is silently dropped. Otherwise
    /// the payload is turned into a message and delivered while the owner
    /// is pinned by the resolved strong reference. Consuming `self` means
    /// the release phase (payload drop) runs exactly once either way.
    pub fn dispatch(self) {
        debug_assert!(
            crate::thread_check::is_consumer_thread(),
            "PendingTask::dispatch called off the consumer thread"
        );

        let Some(owner) = self.target.resolve() else {
            tracing::trace!(
                target: "crosswire_core::pending",
                handle = ?self.target.id(),
                "owner gone; dropping task undelivered"
            );
            return;
        };

        owner.deliver(&self.payload.into_message());
    }
}
