//! Tests for the transfer calls, driven by a scripted transport double.
//!
//! The scripted transport plays back a fixed sequence of callbacks from a
//! thread it spawns, exactly as a platform transport would, so these tests
//! exercise the full path: transport thread → state machine → event queue
//! → cooperative wait → message delivery to the owner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crosswire_core::{
    Message, MessageTarget, Value, WeakHandle, event_queue, owner_registry, wait_until,
};
use crosswire_net::{
    CancelToken, ProgressSink, Result, TransferConfig, TransferError, TransferRequest,
    TransferStatus, Transport, download_url, get_url, load_url, post_url, put_url,
};

/// The event queue is process-wide; run these tests one at a time so they
/// act as the single consumer.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

fn config() -> TransferConfig {
    TransferConfig {
        timeout: Duration::from_secs(5),
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// One scripted transport callback.
#[derive(Clone)]
enum Step {
    Negotiated(i64),
    Chunk(Vec<u8>),
    Progress(u64),
    Uploading(u64),
    Uploaded,
    Finished,
    Error(&'static str),
    Sleep(u64),
}

/// Plays back a callback script from a spawned thread.
struct ScriptedTransport {
    steps: Vec<Step>,
    seen_url: Mutex<Option<String>>,
    captured_cancel: Mutex<Option<CancelToken>>,
    script_done: Arc<AtomicBool>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            seen_url: Mutex::new(None),
            captured_cancel: Mutex::new(None),
            script_done: Arc::new(AtomicBool::new(false)),
        }
    }

    fn seen_url(&self) -> Option<String> {
        self.seen_url.lock().clone()
    }

    fn cancel_token(&self) -> Option<CancelToken> {
        self.captured_cancel.lock().clone()
    }

    fn script_done(&self) -> bool {
        self.script_done.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn start(&self, request: TransferRequest, sink: ProgressSink, cancel: CancelToken) -> Result<()> {
        *self.seen_url.lock() = Some(request.url.to_string());
        *self.captured_cancel.lock() = Some(cancel.clone());

        let steps = self.steps.clone();
        let done = self.script_done.clone();
        std::thread::spawn(move || {
            sink.started();
            for step in steps {
                if cancel.is_cancelled() {
                    sink.error("cancelled");
                    break;
                }
                match step {
                    Step::Negotiated(total) => sink.negotiated(total),
                    Step::Chunk(chunk) => sink.loading(&chunk),
                    Step::Progress(amount) => sink.loading_progress(amount),
                    Step::Uploading(sent) => sink.uploading(sent),
                    Step::Uploaded => sink.uploaded(),
                    Step::Finished => sink.finished(),
                    Step::Error(message) => sink.error(message),
                    Step::Sleep(ms) => std::thread::sleep(Duration::from_millis(ms)),
                }
            }
            done.store(true, Ordering::SeqCst);
        });
        Ok(())
    }
}

/// A transport that refuses to start: the initiating call must fail
/// synchronously, before any callback.
struct FailingTransport;

impl Transport for FailingTransport {
    fn start(&self, _request: TransferRequest, _sink: ProgressSink, _cancel: CancelToken) -> Result<()> {
        Err(TransferError::Request("refused to start".into()))
    }
}

/// An owner that records every message it receives.
#[derive(Default)]
struct Recorder {
    received: Mutex<Vec<Message>>,
}

impl Recorder {
    fn words(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .filter_map(|m| m.arg(1).and_then(Value::as_text).map(str::to_owned))
            .collect()
    }

    fn count(&self) -> usize {
        self.received.lock().len()
    }
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

/// Drain until the owner has seen `expected` messages (the final tasks of
/// a settled transfer may still be in flight when the call returns).
fn drain_until_count(recorder: &Recorder, expected: usize) {
    assert!(
        wait_until(|| recorder.count() >= expected, Duration::from_secs(2)),
        "expected {expected} messages, saw {} ({:?})",
        recorder.count(),
        recorder.words(),
    );
}

// ---------------------------------------------------------------------------
// GET
// ---------------------------------------------------------------------------

#[test]
fn test_get_url_success() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![
        Step::Negotiated(10),
        Step::Chunk(b"hello".to_vec()),
        Step::Chunk(b"world".to_vec()),
        Step::Finished,
    ]);

    let outcome = get_url(handle, "http://x.test/data", &transport, &config());

    assert!(!outcome.is_error());
    assert_eq!(outcome.data(), Some(&b"helloworld"[..]));

    // started, negotiated, loading x2, finished
    drain_until_count(&recorder, 5);
    assert_eq!(
        recorder.words(),
        vec!["contacted", "requested", "loading", "loading", "downloaded"]
    );

    // Loading progress amounts grow and the negotiated total is reported.
    let received = recorder.received.lock();
    let loading: Vec<(i64, i64)> = received
        .iter()
        .filter(|m| m.arg(1).and_then(Value::as_text) == Some("loading"))
        .map(|m| {
            (
                m.arg(2).and_then(Value::as_int).unwrap(),
                m.arg(3).and_then(Value::as_int).unwrap(),
            )
        })
        .collect();
    assert_eq!(loading, vec![(5, 10), (10, 10)]);
    drop(received);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_get_url_transport_error() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![
        Step::Negotiated(-1),
        Step::Chunk(b"partial".to_vec()),
        Step::Error("connection reset"),
    ]);

    let outcome = get_url(handle, "http://x.test/data", &transport, &config());

    assert!(outcome.is_error());
    assert_eq!(outcome.error_text(), Some("connection reset"));
    assert!(outcome.data().is_none());

    drain_until_count(&recorder, 4);
    assert_eq!(recorder.words().last().map(String::as_str), Some("error"));
    owner_registry().destroy(handle.id());
}

#[test]
fn test_get_url_start_failure_is_synchronous() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();

    let outcome = get_url(handle, "http://x.test/data", &FailingTransport, &config());

    assert!(outcome.is_error());
    assert!(outcome.error_text().unwrap().contains("refused to start"));
    // No callback was ever registered, so no messages arrive.
    assert_eq!(recorder.count(), 0);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_get_url_timeout_cancels_transport() {
    let _guard = serial();
    let (_recorder, handle) = register_recorder();
    // Never reaches a terminal status within the caller's deadline.
    let transport = ScriptedTransport::new(vec![Step::Sleep(1000), Step::Finished]);

    let outcome = get_url(
        handle,
        "http://x.test/slow",
        &transport,
        &TransferConfig {
            timeout: Duration::from_millis(100),
        },
    );

    assert!(outcome.is_error());
    assert_eq!(outcome.error_text(), Some("timeout"));
    // The caller's timeout tripped the in-flight operation's token.
    assert!(transport.cancel_token().unwrap().is_cancelled());

    // Let the script wind down and drop its late tasks.
    assert!(wait_until(|| transport.script_done(), Duration::from_secs(5)));
    event_queue().dispatch_pending(usize::MAX);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_get_url_with_dead_owner_still_returns_data() {
    let _guard = serial();
    // The initiating owner was destroyed before the call: progress has
    // nowhere to go, but the synchronous result is unaffected.
    let transport =
        ScriptedTransport::new(vec![Step::Chunk(b"payload".to_vec()), Step::Finished]);

    let outcome = get_url(
        WeakHandle::dangling(),
        "http://x.test/data",
        &transport,
        &config(),
    );

    assert!(!outcome.is_error());
    assert_eq!(outcome.data(), Some(&b"payload"[..]));
    event_queue().dispatch_pending(usize::MAX);
}

#[test]
fn test_get_url_trims_whitespace() {
    let _guard = serial();
    let (_recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![Step::Finished]);

    let _ = get_url(handle, " http://x.test \n", &transport, &config());

    assert_eq!(transport.seen_url(), Some("http://x.test".to_owned()));
    event_queue().dispatch_pending(usize::MAX);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_empty_url_still_reaches_transport() {
    let _guard = serial();
    let (_recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![Step::Error("no url")]);

    let outcome = get_url(handle, "  \n ", &transport, &config());

    // Trimming is the only normalization: the empty url is handed to the
    // transport, which is free to fail it.
    assert_eq!(transport.seen_url(), Some(String::new()));
    assert!(outcome.is_error());
    event_queue().dispatch_pending(usize::MAX);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_callbacks_after_finished_do_not_corrupt_result() {
    let _guard = serial();
    let (_recorder, handle) = register_recorder();
    // A sloppy transport that keeps talking after the terminal status.
    let transport = ScriptedTransport::new(vec![
        Step::Chunk(b"ok".to_vec()),
        Step::Finished,
        Step::Chunk(b"late".to_vec()),
        Step::Error("late failure"),
    ]);

    let outcome = get_url(handle, "http://x.test/data", &transport, &config());

    assert!(!outcome.is_error());
    assert_eq!(outcome.data(), Some(&b"ok"[..]));

    assert!(wait_until(|| transport.script_done(), Duration::from_secs(5)));
    event_queue().dispatch_pending(usize::MAX);
    owner_registry().destroy(handle.id());
}

// ---------------------------------------------------------------------------
// POST / PUT
// ---------------------------------------------------------------------------

#[test]
fn test_post_url_upload_progress_and_response() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![
        Step::Uploading(250),
        Step::Uploading(500),
        Step::Uploading(1000),
        Step::Uploaded,
        Step::Chunk(b"created".to_vec()),
        Step::Finished,
    ]);

    let body = vec![0u8; 1000];
    let outcome = post_url(handle, "http://x.test/submit", body, &transport, &config());

    assert!(!outcome.is_error());
    assert_eq!(outcome.data(), Some(&b"created"[..]));

    // started, uploading x3, uploaded, loading, finished
    drain_until_count(&recorder, 7);
    let words = recorder.words();
    assert_eq!(
        words,
        vec![
            "contacted",
            "uploading",
            "uploading",
            "uploading",
            "uploaded",
            "loading",
            "downloaded"
        ]
    );

    // Uploading sent-counts are non-decreasing against the body length,
    // ending at the full 1000 before the uploaded transition.
    let received = recorder.received.lock();
    let uploading: Vec<(i64, i64)> = received
        .iter()
        .filter(|m| m.arg(1).and_then(Value::as_text) == Some("uploading"))
        .map(|m| {
            (
                m.arg(2).and_then(Value::as_int).unwrap(),
                m.arg(3).and_then(Value::as_int).unwrap(),
            )
        })
        .collect();
    assert_eq!(uploading, vec![(250, 1000), (500, 1000), (1000, 1000)]);
    drop(received);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_put_url_settles_at_uploaded() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport =
        ScriptedTransport::new(vec![Step::Uploading(4), Step::Uploaded]);

    let outcome = put_url(handle, "http://x.test/item", b"data".to_vec(), &transport, &config());

    assert!(!outcome.is_error());
    assert!(outcome.data().is_none());

    // started, uploading, uploaded
    drain_until_count(&recorder, 3);
    assert_eq!(recorder.words().last().map(String::as_str), Some("uploaded"));
    owner_registry().destroy(handle.id());
}

#[test]
fn test_put_url_error() {
    let _guard = serial();
    let (_recorder, handle) = register_recorder();
    let transport =
        ScriptedTransport::new(vec![Step::Uploading(2), Step::Error("disk full")]);

    let outcome = put_url(handle, "http://x.test/item", b"data".to_vec(), &transport, &config());

    assert!(outcome.is_error());
    assert_eq!(outcome.error_text(), Some("disk full"));
    event_queue().dispatch_pending(usize::MAX);
    owner_registry().destroy(handle.id());
}

// ---------------------------------------------------------------------------
// DOWNLOAD
// ---------------------------------------------------------------------------

#[test]
fn test_download_url_streams_to_file() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![
        Step::Negotiated(9),
        Step::Chunk(b"abc".to_vec()),
        Step::Chunk(b"defghi".to_vec()),
        Step::Finished,
    ]);

    let tmp = tempfile::NamedTempFile::new().expect("temp file");
    let outcome = download_url(
        handle,
        "http://x.test/file.bin",
        tmp.path(),
        &transport,
        &config(),
    );

    assert!(!outcome.is_error());
    // The chunks add up to the file's final size, which matches the
    // negotiated total.
    let on_disk = std::fs::read(tmp.path()).expect("read back");
    assert_eq!(on_disk, b"abcdefghi");
    assert_eq!(on_disk.len(), 9);

    drain_until_count(&recorder, 5);
    let received = recorder.received.lock();
    let last_loading_total = received
        .iter()
        .filter(|m| m.arg(1).and_then(Value::as_text) == Some("loading"))
        .next_back()
        .and_then(|m| m.arg(3).and_then(Value::as_int));
    assert_eq!(last_loading_total, Some(9));
    drop(received);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_download_url_unopenable_target_fails_before_start() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![Step::Finished]);

    let outcome = download_url(
        handle,
        "http://x.test/file.bin",
        std::path::Path::new("/nonexistent-crosswire-dir/file.bin"),
        &transport,
        &config(),
    );

    assert!(outcome.is_error());
    assert_eq!(outcome.error_text(), Some("can't open that file"));
    // The transport was never invoked.
    assert_eq!(transport.seen_url(), None);
    assert_eq!(recorder.count(), 0);
    owner_registry().destroy(handle.id());
}

// ---------------------------------------------------------------------------
// LOAD
// ---------------------------------------------------------------------------

#[test]
fn test_load_url_posts_completion_message() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![
        Step::Negotiated(4),
        Step::Chunk(b"data".to_vec()),
        Step::Finished,
    ]);

    let load = load_url(handle, "http://x.test/doc", "loadDone", &transport)
        .expect("load should start");

    assert!(wait_until(|| load.is_settled(), Duration::from_secs(5)));
    assert_eq!(load.status(), TransferStatus::Finished);

    // started, negotiated, loading, finished progress + the completion.
    drain_until_count(&recorder, 5);
    let received = recorder.received.lock();
    let completion = received
        .iter()
        .find(|m| m.name() == "loadDone")
        .expect("completion message");
    assert_eq!(completion.arg(0).and_then(Value::as_text), Some("http://x.test/doc"));
    assert_eq!(completion.arg(1).and_then(Value::as_text), Some("downloaded"));
    assert_eq!(completion.arg(2).and_then(Value::as_bytes), Some(&b"data"[..]));
    assert_eq!(completion.arg(3).and_then(Value::as_int), Some(4));
    drop(received);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_load_url_error_completion() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![Step::Error("HTTP 404")]);

    let load = load_url(handle, "http://x.test/missing", "loadDone", &transport)
        .expect("load should start");

    assert!(wait_until(|| load.is_settled(), Duration::from_secs(5)));
    assert_eq!(load.status(), TransferStatus::Error);

    drain_until_count(&recorder, 3);
    let received = recorder.received.lock();
    let completion = received
        .iter()
        .find(|m| m.name() == "loadDone")
        .expect("completion message");
    assert_eq!(completion.arg(1).and_then(Value::as_text), Some("error"));
    assert_eq!(completion.arg(2).and_then(Value::as_text), Some("HTTP 404"));
    drop(received);
    owner_registry().destroy(handle.id());
}

#[test]
fn test_load_url_start_failure() {
    let _guard = serial();
    let (_recorder, handle) = register_recorder();

    let result = load_url(handle, "http://x.test/doc", "loadDone", &FailingTransport);
    assert!(result.is_err());
    owner_registry().destroy(handle.id());
}

#[test]
fn test_owner_destroyed_mid_load_drops_notifications() {
    let _guard = serial();
    let (recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![
        Step::Sleep(50),
        Step::Chunk(b"data".to_vec()),
        Step::Finished,
    ]);

    let load = load_url(handle, "http://x.test/doc", "loadDone", &transport)
        .expect("load should start");

    // Script logic destroys the owner while the transfer is in flight.
    owner_registry().destroy(handle.id());

    assert!(wait_until(|| load.is_settled(), Duration::from_secs(5)));
    assert!(wait_until(|| transport.script_done(), Duration::from_secs(5)));
    event_queue().dispatch_pending(usize::MAX);

    // Every task resolved an invalid handle and was silently dropped.
    assert_eq!(recorder.count(), 0);
    assert_eq!(load.status(), TransferStatus::Finished);
}

#[test]
fn test_load_handle_cancel_trips_token() {
    let _guard = serial();
    let (_recorder, handle) = register_recorder();
    let transport = ScriptedTransport::new(vec![Step::Sleep(200), Step::Finished]);

    let load = load_url(handle, "http://x.test/doc", "loadDone", &transport)
        .expect("load should start");
    load.cancel();

    assert!(transport.cancel_token().unwrap().is_cancelled());
    // The scripted transport reports the cancellation as an error status.
    assert!(wait_until(|| load.is_settled(), Duration::from_secs(5)));
    assert_eq!(load.status(), TransferStatus::Error);
    event_queue().dispatch_pending(usize::MAX);
    owner_registry().destroy(handle.id());
}
