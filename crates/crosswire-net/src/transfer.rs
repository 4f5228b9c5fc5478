//! The transfer calls: GET, LOAD, POST, PUT and DOWNLOAD.
//!
//! Each call strips its url, builds a [`TransferOperation`], hands a
//! [`ProgressSink`] and [`CancelToken`] to the transport, and - for the
//! synchronous flavors - blocks in a cooperative wait until the operation
//! settles or the configured timeout elapses. Blocking cooperatively
//! means the event queue keeps draining, so the owner receives its
//! `urlProgress` messages *while* the call is still waiting.
//!
//! Synchronous calls return a [`ResultSink`]: a per-call pair of `result`
//! / `url_result` slots. A timed-out call trips the operation's cancel
//! token before returning, telling the transport to stop; the timeout
//! itself is reported as the caller-visible error `"timeout"` in the
//! sink, since the coordination layer has no opinion about how embedders
//! surface it.
//!
//! LOAD is the asynchronous flavor: it returns a [`LoadHandle`]
//! immediately and reports completion by posting the caller-chosen
//! message with the downloaded data.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crosswire_core::{Value, WeakHandle, wait_until};

use crate::error::Result;
use crate::operation::{DataSink, ProgressSink, SharedOperation, TransferKind, TransferOperation};
use crate::status::TransferStatus;
use crate::transport::{CancelToken, TransferMethod, TransferRequest, Transport};
use crate::url::strip_url;

/// Tuning for synchronous transfer calls.
#[derive(Clone, Debug)]
pub struct TransferConfig {
    /// Overall deadline for a synchronous call.
    pub timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
        }
    }
}

/// The per-call result slots a synchronous transfer returns.
///
/// `result` holds the error (empty on success); `url_result` holds the
/// fetched payload for calls that produce one. Being a per-call value -
/// rather than process-wide state - makes concurrent synchronous calls
/// from independent flows safe.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSink {
    /// The error slot; `None` means the call succeeded.
    pub result: Option<Value>,
    /// The payload slot (GET and POST response bodies).
    pub url_result: Option<Value>,
}

impl ResultSink {
    fn success() -> Self {
        Self::default()
    }

    fn success_with_data(data: Vec<u8>) -> Self {
        Self {
            result: None,
            url_result: Some(Value::Bytes(data)),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            result: Some(Value::Text(message.into())),
            url_result: None,
        }
    }

    /// Whether the call failed.
    pub fn is_error(&self) -> bool {
        self.result.is_some()
    }

    /// The fetched payload, if any.
    pub fn data(&self) -> Option<&[u8]> {
        self.url_result.as_ref().and_then(Value::as_bytes)
    }

    /// The error text, if the call failed.
    pub fn error_text(&self) -> Option<&str> {
        self.result.as_ref().and_then(Value::as_text)
    }
}

/// Strip the url, build the operation and start the transport.
fn launch(
    kind: TransferKind,
    method: TransferMethod,
    url: &str,
    target: WeakHandle,
    body: Option<Vec<u8>>,
    sink: DataSink,
    completion_message: Option<String>,
    transport: &dyn Transport,
) -> Result<(SharedOperation, CancelToken)> {
    let url: Arc<str> = Arc::from(strip_url(url));
    let send_total = body.as_ref().map_or(-1, |b| b.len() as i64);

    let op = Arc::new(Mutex::new(TransferOperation::new(
        kind,
        url.clone(),
        target,
        sink,
        send_total,
        completion_message,
    )));
    let progress = ProgressSink::new(op.clone());
    let cancel = CancelToken::new();

    tracing::debug!(target: "crosswire_net::transfer", %url, ?kind, "starting transfer");
    transport.start(
        TransferRequest { url, method, body },
        progress,
        cancel.clone(),
    )?;

    Ok((op, cancel))
}

/// Wait cooperatively until the operation settles. On timeout, trip the
/// cancel token so the transport stops, and report `false`.
fn await_settled(op: &SharedOperation, cancel: &CancelToken, timeout: Duration) -> bool {
    let pred_op = op.clone();
    let settled = wait_until(move || pred_op.lock().is_settled(), timeout);
    if !settled {
        tracing::warn!(
            target: "crosswire_net::transfer",
            url = %op.lock().url(),
            "synchronous transfer timed out; cancelling transport"
        );
        cancel.cancel();
    }
    settled
}

/// Synchronously fetch `url` into memory.
///
/// Progress messages are delivered to `target` while the call waits. On
/// success the sink's `url_result` holds the fetched bytes; on failure
/// `result` holds the error.
pub fn get_url(
    target: WeakHandle,
    url: &str,
    transport: &dyn Transport,
    config: &TransferConfig,
) -> ResultSink {
    let (op, cancel) = match launch(
        TransferKind::Get,
        TransferMethod::Get,
        url,
        target,
        None,
        DataSink::Buffer(Vec::new()),
        None,
        transport,
    ) {
        Ok(launched) => launched,
        Err(err) => return ResultSink::failure(err.to_string()),
    };

    if !await_settled(&op, &cancel, config.timeout) {
        return ResultSink::failure("timeout");
    }

    let mut op = op.lock();
    if op.status() == TransferStatus::Finished {
        ResultSink::success_with_data(op.take_data())
    } else {
        ResultSink::failure(op.error_message())
    }
}

/// Asynchronously fetch `url` into memory.
///
/// Returns as soon as the transport accepts the request. Progress is
/// reported as `urlProgress` messages; completion posts `message` to the
/// owner with the downloaded data (or the error).
pub fn load_url(
    target: WeakHandle,
    url: &str,
    message: &str,
    transport: &dyn Transport,
) -> Result<LoadHandle> {
    let (op, cancel) = launch(
        TransferKind::Load,
        TransferMethod::Get,
        url,
        target,
        None,
        DataSink::Buffer(Vec::new()),
        Some(message.to_owned()),
        transport,
    )?;
    Ok(LoadHandle { op, cancel })
}

/// Synchronously POST `body` to `url` and collect the response body.
///
/// The body length is the known upload total for `uploading` progress; the
/// response arrives as `loading` progress after `uploaded`. On success the
/// sink's `url_result` holds the response body.
pub fn post_url(
    target: WeakHandle,
    url: &str,
    body: Vec<u8>,
    transport: &dyn Transport,
    config: &TransferConfig,
) -> ResultSink {
    let (op, cancel) = match launch(
        TransferKind::Post,
        TransferMethod::Post,
        url,
        target,
        Some(body),
        DataSink::Buffer(Vec::new()),
        None,
        transport,
    ) {
        Ok(launched) => launched,
        Err(err) => return ResultSink::failure(err.to_string()),
    };

    if !await_settled(&op, &cancel, config.timeout) {
        return ResultSink::failure("timeout");
    }

    let mut op = op.lock();
    if op.status() == TransferStatus::Finished {
        ResultSink::success_with_data(op.take_data())
    } else {
        ResultSink::failure(op.error_message())
    }
}

/// Synchronously PUT `body` to `url`.
///
/// `Uploaded` is the terminal success status: the call returns once the
/// body has been fully sent, without waiting for (or reading) a response
/// body.
pub fn put_url(
    target: WeakHandle,
    url: &str,
    body: Vec<u8>,
    transport: &dyn Transport,
    config: &TransferConfig,
) -> ResultSink {
    let (op, cancel) = match launch(
        TransferKind::Put,
        TransferMethod::Put,
        url,
        target,
        Some(body),
        DataSink::Discard,
        None,
        transport,
    ) {
        Ok(launched) => launched,
        Err(err) => return ResultSink::failure(err.to_string()),
    };

    if !await_settled(&op, &cancel, config.timeout) {
        return ResultSink::failure("timeout");
    }

    let op = op.lock();
    match op.status() {
        TransferStatus::Uploaded | TransferStatus::Finished => ResultSink::success(),
        _ => ResultSink::failure(op.error_message()),
    }
}

/// Synchronously fetch `url`, streaming the body to `path`.
///
/// The destination file is created before the transfer starts; if that
/// fails the operation never starts and the sink reports
/// `"can't open that file"`. Chunks are written incrementally rather than
/// buffered, so the transfer's running total is the number of bytes on
/// disk.
pub fn download_url(
    target: WeakHandle,
    url: &str,
    path: &Path,
    transport: &dyn Transport,
    config: &TransferConfig,
) -> ResultSink {
    let file = match File::create(path) {
        Ok(file) => file,
        Err(err) => {
            tracing::warn!(
                target: "crosswire_net::transfer",
                path = %path.display(),
                %err,
                "cannot open download target"
            );
            return ResultSink::failure("can't open that file");
        }
    };

    let (op, cancel) = match launch(
        TransferKind::Download,
        TransferMethod::Get,
        url,
        target,
        None,
        DataSink::File(file),
        None,
        transport,
    ) {
        Ok(launched) => launched,
        Err(err) => return ResultSink::failure(err.to_string()),
    };

    if !await_settled(&op, &cancel, config.timeout) {
        return ResultSink::failure("timeout");
    }

    let op = op.lock();
    if op.status() == TransferStatus::Finished {
        ResultSink::success()
    } else {
        ResultSink::failure(op.error_message())
    }
}

/// Observer handle for an asynchronous LOAD.
pub struct LoadHandle {
    op: SharedOperation,
    cancel: CancelToken,
}

impl LoadHandle {
    /// The operation's current status.
    pub fn status(&self) -> TransferStatus {
        self.op.lock().status()
    }

    /// Whether the operation has settled.
    pub fn is_settled(&self) -> bool {
        self.op.lock().is_settled()
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.op.lock().received()
    }

    /// Declared total, or -1 if unknown.
    pub fn total(&self) -> i64 {
        self.op.lock().total()
    }

    /// Tell the transport to stop this load.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
