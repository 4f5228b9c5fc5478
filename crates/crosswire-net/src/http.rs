//! Reference HTTP transport.
//!
//! A [`Transport`] implementation backed by a blocking HTTP client, run on
//! a dedicated thread per transfer - the "thread the transport controls"
//! in the callback contract. It exists so the crate is usable end to end
//! without an embedder-supplied transport; the coordination layer has no
//! dependency on it, and nothing here is observable through the state
//! machines beyond the callback grammar every transport follows.
//!
//! Request bodies are streamed through a counting reader so `uploading`
//! progress reflects bytes actually handed to the connection; response
//! bodies are read in fixed-size chunks with the cancel token checked
//! between chunks.

use std::io::{Cursor, Read};
use std::time::Duration;

use reqwest::blocking::{Body, Client};

use crate::error::{Result, TransferError};
use crate::operation::ProgressSink;
use crate::transport::{CancelToken, TransferMethod, TransferRequest, Transport};

/// Response body read chunk size.
const CHUNK_SIZE: usize = 8192;

/// A blocking-HTTP implementation of [`Transport`].
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with TLS certificate verification enabled.
    pub fn new() -> Result<Self> {
        Self::with_tls_verification(true)
    }

    /// Create a transport, optionally disabling TLS certificate
    /// verification (for development against self-signed endpoints).
    pub fn with_tls_verification(verify: bool) -> Result<Self> {
        let client = Client::builder()
            // Deadlines belong to the caller's cooperative wait, not the
            // HTTP layer.
            .timeout(None::<Duration>)
            .danger_accept_invalid_certs(!verify)
            .build()
            .map_err(|err| TransferError::Request(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn start(&self, request: TransferRequest, sink: ProgressSink, cancel: CancelToken) -> Result<()> {
        let client = self.client.clone();
        std::thread::Builder::new()
            .name("crosswire-http".into())
            .spawn(move || run_transfer(client, request, sink, cancel))
            .map_err(|err| TransferError::Io(err.to_string()))?;
        Ok(())
    }
}

fn run_transfer(client: Client, request: TransferRequest, sink: ProgressSink, cancel: CancelToken) {
    sink.started();

    let url = request.url.to_string();
    let has_body = request.body.is_some();

    let mut builder = match request.method {
        TransferMethod::Get => client.get(&url),
        TransferMethod::Post => client.post(&url),
        TransferMethod::Put => client.put(&url),
    };
    if let Some(bytes) = request.body {
        let len = bytes.len() as u64;
        let reader = CountingReader {
            inner: Cursor::new(bytes),
            sink: sink.clone(),
            cancel: cancel.clone(),
            sent: 0,
        };
        builder = builder.body(Body::sized(reader, len));
    }

    let mut response = match builder.send() {
        Ok(response) => response,
        Err(err) => {
            sink.error(&err.to_string());
            return;
        }
    };

    if !response.status().is_success() {
        sink.error(&format!("HTTP {}", response.status().as_u16()));
        return;
    }
    if has_body {
        sink.uploaded();
    }

    match request.method {
        TransferMethod::Get => {
            let total = response.content_length().map_or(-1, |len| len as i64);
            sink.negotiated(total);
            read_body(&mut response, &sink, &cancel);
        }
        TransferMethod::Post => {
            // The response total was not negotiated up front; loading
            // progress is indeterminate.
            read_body(&mut response, &sink, &cancel);
        }
        TransferMethod::Put => {
            // PUT settles at `uploaded`; the response body is not read.
        }
    }
}

fn read_body(response: &mut reqwest::blocking::Response, sink: &ProgressSink, cancel: &CancelToken) {
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        if cancel.is_cancelled() {
            sink.error("cancelled");
            return;
        }
        match response.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => sink.loading(&buf[..n]),
            Err(err) => {
                sink.error(&err.to_string());
                return;
            }
        }
    }
    sink.finished();
}

/// Streams a request body while reporting `uploading` progress.
struct CountingReader {
    inner: Cursor<Vec<u8>>,
    sink: ProgressSink,
    cancel: CancelToken,
    sent: u64,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(std::io::Error::other("transfer cancelled"));
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.sent += n as u64;
            self.sink.uploading(self.sent);
        }
        Ok(n)
    }
}
