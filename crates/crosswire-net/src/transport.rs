//! The transport collaborator contract.
//!
//! The coordination layer never talks to the network itself. A
//! [`Transport`] - platform HTTP stack, test double, anything - accepts a
//! [`TransferRequest`] together with a [`ProgressSink`] and drives the
//! sink from a thread it controls as the transfer proceeds. The sink is
//! the typed equivalent of a `callback(context, status, data)` contract:
//! each method corresponds to one status, with the status-dependent datum
//! as its argument.
//!
//! The transport's obligations:
//!
//! - call the sink any number of times with non-terminal statuses, then
//!   **exactly once** with a terminal one (`finished` or `error`);
//! - make every call from a thread it controls (which may or may not be
//!   the consumer thread - the sink is `Send` and posts to the event
//!   queue rather than touching interpreter state);
//! - observe the [`CancelToken`] between chunks and stop promptly once it
//!   is tripped.
//!
//! Calls after the terminal status are tolerated and ignored by the sink,
//! so a sloppy transport degrades to log noise instead of corruption.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;
use crate::operation::ProgressSink;

/// The HTTP-ish verb of a transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMethod {
    /// Fetch the resource (GET, LOAD, DOWNLOAD).
    Get,
    /// Send a body and read a response body (POST).
    Post,
    /// Send a body (PUT).
    Put,
}

/// Everything a transport needs to start a transfer.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    /// The (already stripped) target url.
    pub url: Arc<str>,
    /// The transfer verb.
    pub method: TransferMethod,
    /// The request body for POST/PUT, `None` otherwise.
    pub body: Option<Vec<u8>>,
}

/// A shared cancellation flag for one transfer.
///
/// The initiating call keeps one clone and hands another to the
/// transport. A synchronous caller whose wait times out trips the token
/// before returning; the transport polls it between chunks.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether the token has been tripped.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A component that can execute transfer requests.
///
/// `start` must return promptly: implementations run the transfer on a
/// thread (or event source) of their own and report through the sink.
/// Returning an error means the transfer never started - no sink call
/// will be made, and the initiating call fails synchronously.
pub trait Transport: Send + Sync {
    /// Begin executing `request`, reporting progress through `sink`.
    fn start(&self, request: TransferRequest, sink: ProgressSink, cancel: CancelToken) -> Result<()>;
}
