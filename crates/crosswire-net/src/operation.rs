//! Per-call transfer operation contexts and the state-machine advance.
//!
//! One [`TransferOperation`] exists per GET/LOAD/POST/PUT/DOWNLOAD call.
//! It is advanced exclusively by the transport driving the operation's
//! [`ProgressSink`] - the machine never polls. Each accepted callback
//! updates the context (accumulating bytes, recording totals) and posts a
//! pending task describing the new status to the event queue, where the
//! consumer thread turns it into a `urlProgress` message for the owner.
//!
//! The context is shared between the initiating call (which polls the
//! status from inside a cooperative wait, for the synchronous flavors) and
//! the transport's thread; a mutex serializes the two without changing the
//! single-logical-writer discipline - the transport owns every mutation.
//!
//! Once an operation settles (reaches `Finished`/`Error`, or `Uploaded`
//! for PUT) further transport callbacks are a protocol violation; they are
//! ignored with a log line rather than crashing or corrupting state.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use crosswire_core::{PendingTask, TransferPhase, WeakHandle, event_queue};

use crate::status::TransferStatus;

/// The kind of transfer call this operation belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    /// Synchronous fetch into memory.
    Get,
    /// Asynchronous fetch into memory with a completion message.
    Load,
    /// Synchronous send-then-receive.
    Post,
    /// Synchronous send.
    Put,
    /// Synchronous fetch streamed to a file.
    Download,
}

/// Where received bytes go.
pub(crate) enum DataSink {
    /// Accumulate in memory (GET, LOAD, POST).
    Buffer(Vec<u8>),
    /// Stream to an open file (DOWNLOAD).
    File(File),
    /// Ignore any response body (PUT).
    Discard,
}

/// The mutable context of one transfer call.
pub struct TransferOperation {
    url: Arc<str>,
    kind: TransferKind,
    target: WeakHandle,
    status: TransferStatus,
    /// Bytes received (or, for DOWNLOAD, written) so far.
    received: u64,
    /// Declared receive total; -1 until negotiated.
    total: i64,
    /// Bytes of the request body sent so far.
    sent: u64,
    /// Request body length for POST/PUT; -1 when there is no body.
    send_total: i64,
    sink: DataSink,
    error: Option<String>,
    /// Completion message name (LOAD only).
    completion_message: Option<String>,
}

impl TransferOperation {
    pub(crate) fn new(
        kind: TransferKind,
        url: Arc<str>,
        target: WeakHandle,
        sink: DataSink,
        send_total: i64,
        completion_message: Option<String>,
    ) -> Self {
        Self {
            url,
            kind,
            target,
            status: TransferStatus::Pending,
            received: 0,
            total: -1,
            sent: 0,
            send_total,
            sink,
            error: None,
            completion_message,
        }
    }

    /// The operation's url.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The operation kind.
    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// The current status.
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Declared receive total, or -1 if unknown.
    pub fn total(&self) -> i64 {
        self.total
    }

    /// Bytes of the request body sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// The transport's error message, if the operation failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the operation has settled for its kind: `Finished`/`Error`
    /// for everything, plus `Uploaded` for PUT (whose success ends there).
    pub fn is_settled(&self) -> bool {
        self.status.is_terminal()
            || (self.kind == TransferKind::Put && self.status == TransferStatus::Uploaded)
    }

    pub(crate) fn error_message(&self) -> String {
        self.error.clone().unwrap_or_else(|| "error".to_owned())
    }

    /// Take the accumulated buffer out of the operation.
    pub(crate) fn take_data(&mut self) -> Vec<u8> {
        match &mut self.sink {
            DataSink::Buffer(buf) => std::mem::take(buf),
            _ => Vec::new(),
        }
    }

    fn data_snapshot(&self) -> Vec<u8> {
        match &self.sink {
            DataSink::Buffer(buf) => buf.clone(),
            _ => Vec::new(),
        }
    }

    /// The progress phase reported for the current status.
    fn progress_phase(&self) -> TransferPhase {
        match self.status {
            TransferStatus::Pending | TransferStatus::Started => TransferPhase::Contacted,
            TransferStatus::Negotiated => TransferPhase::Requested,
            TransferStatus::Uploading => TransferPhase::Uploading {
                sent: self.sent,
                total: self.send_total,
            },
            TransferStatus::Uploaded => TransferPhase::Uploaded,
            TransferStatus::Loading | TransferStatus::LoadingProgress => TransferPhase::Loading {
                amount: self.received,
                total: self.total,
            },
            TransferStatus::Finished => TransferPhase::Downloaded,
            TransferStatus::Error => TransferPhase::Failed {
                message: self.error_message(),
            },
        }
    }
}

pub(crate) type SharedOperation = Arc<Mutex<TransferOperation>>;

/// The status-dependent datum of one transport callback.
enum CallbackData<'a> {
    None,
    Total(i64),
    Chunk(&'a [u8]),
    Amount(u64),
    Sent(u64),
    Message(&'a str),
}

/// The write side of a transfer operation, handed to the transport.
///
/// Each method is one status report; see the module docs of
/// [`crate::transport`] for the contract. Cloneable and `Send` so a
/// transport can report from wherever its I/O happens.
#[derive(Clone)]
pub struct ProgressSink {
    op: SharedOperation,
}

impl ProgressSink {
    pub(crate) fn new(op: SharedOperation) -> Self {
        Self { op }
    }

    /// The transport has been contacted.
    pub fn started(&self) {
        self.advance(TransferStatus::Started, CallbackData::None);
    }

    /// The request has been negotiated; `total` is the declared size of
    /// the response body, or -1 if the remote end did not declare one.
    pub fn negotiated(&self, total: i64) {
        self.advance(TransferStatus::Negotiated, CallbackData::Total(total));
    }

    /// A chunk of the response body has arrived.
    pub fn loading(&self, chunk: &[u8]) {
        self.advance(TransferStatus::Loading, CallbackData::Chunk(chunk));
    }

    /// A size-only progress report: `amount` bytes have arrived in total.
    pub fn loading_progress(&self, amount: u64) {
        self.advance(TransferStatus::LoadingProgress, CallbackData::Amount(amount));
    }

    /// `sent` bytes of the request body have been sent so far.
    pub fn uploading(&self, sent: u64) {
        self.advance(TransferStatus::Uploading, CallbackData::Sent(sent));
    }

    /// The request body has been fully sent.
    pub fn uploaded(&self) {
        self.advance(TransferStatus::Uploaded, CallbackData::None);
    }

    /// The transfer completed successfully. Terminal.
    pub fn finished(&self) {
        self.advance(TransferStatus::Finished, CallbackData::None);
    }

    /// The transfer failed. Terminal.
    pub fn error(&self, message: &str) {
        self.advance(TransferStatus::Error, CallbackData::Message(message));
    }

    fn advance(&self, status: TransferStatus, data: CallbackData<'_>) {
        let mut tasks: Vec<PendingTask> = Vec::with_capacity(2);
        {
            let mut guard = self.op.lock();
            let op = &mut *guard;

            if op.is_settled() {
                tracing::warn!(
                    target: "crosswire_net::transfer",
                    url = %op.url,
                    ignored = ?status,
                    "transport callback after terminal status ignored"
                );
                return;
            }
            if !status.may_follow(op.status) {
                tracing::warn!(
                    target: "crosswire_net::transfer",
                    url = %op.url,
                    from = ?op.status,
                    to = ?status,
                    "out-of-order transport callback ignored"
                );
                return;
            }

            let mut status = status;
            match data {
                CallbackData::Total(total) => op.total = total,
                CallbackData::Chunk(chunk) => match op.kind {
                    TransferKind::Download => {
                        if let DataSink::File(file) = &mut op.sink {
                            match file.write_all(chunk) {
                                Ok(()) => op.received += chunk.len() as u64,
                                Err(err) => {
                                    status = TransferStatus::Error;
                                    op.error = Some(format!("file write failed: {err}"));
                                }
                            }
                        }
                    }
                    TransferKind::Put => {}
                    _ => {
                        if let DataSink::Buffer(buf) = &mut op.sink {
                            buf.extend_from_slice(chunk);
                            op.received = op.received.max(buf.len() as u64);
                        }
                    }
                },
                CallbackData::Amount(amount) => op.received = op.received.max(amount),
                CallbackData::Sent(sent) => op.sent = sent,
                CallbackData::Message(message) => op.error = Some(message.to_owned()),
                CallbackData::None => {}
            }
            if status == TransferStatus::Uploaded && op.send_total >= 0 {
                op.sent = op.send_total as u64;
            }

            op.status = status;
            tracing::trace!(
                target: "crosswire_net::transfer",
                url = %op.url,
                ?status,
                received = op.received,
                "transfer advanced"
            );

            if status == TransferStatus::Finished
                && let DataSink::File(file) = &mut op.sink
            {
                let _ = file.flush();
            }

            tasks.push(PendingTask::transfer_progress(
                op.target,
                op.url.clone(),
                op.progress_phase(),
            ));

            // LOAD completion: one extra task carrying the caller-chosen
            // message and, on success, the downloaded data.
            if op.kind == TransferKind::Load
                && let Some(message) = op.completion_message.clone()
            {
                match status {
                    TransferStatus::Finished => tasks.push(PendingTask::transfer_finished(
                        op.target,
                        message,
                        op.url.clone(),
                        op.data_snapshot(),
                    )),
                    TransferStatus::Error => tasks.push(PendingTask::transfer_error(
                        op.target,
                        message,
                        op.url.clone(),
                        op.error_message(),
                    )),
                    _ => {}
                }
            }
        }

        for task in tasks {
            if event_queue().post(task).is_err() {
                tracing::debug!(
                    target: "crosswire_net::transfer",
                    "event queue closed; transfer task released undelivered"
                );
            }
        }
    }
}
