//! URL transfer coordination for Crosswire.
//!
//! This crate provides the transfer state machines built on the
//! `crosswire-core` event queue and cooperative wait:
//!
//! - **Synchronous calls** ([`get_url`], [`post_url`], [`put_url`],
//!   [`download_url`]): block the consumer thread cooperatively - progress
//!   messages keep flowing to the owner - until the transfer settles or a
//!   timeout elapses, then return a per-call [`ResultSink`]
//! - **Asynchronous LOAD** ([`load_url`]): returns immediately and posts a
//!   caller-chosen completion message with the downloaded data
//! - **The transport contract** ([`Transport`], [`ProgressSink`],
//!   [`CancelToken`]): the seam where a platform HTTP stack (or a test
//!   double) plugs in and drives the state machine from its own threads
//! - **A reference transport** ([`http::HttpTransport`], feature `http`):
//!   a blocking HTTP client run on a thread per transfer
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use crosswire_core::{owner_registry, Message, MessageTarget, WeakHandle};
//! use crosswire_net::{get_url, http::HttpTransport, TransferConfig};
//!
//! struct Card;
//! impl MessageTarget for Card {
//!     fn deliver(&self, message: &Message) {
//!         // urlProgress url, "loading", amount, total ...
//!         println!("{} {:?}", message.name(), message.args());
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! crosswire_core::init_runtime();
//! let owner = owner_registry().register(Arc::new(Card));
//! let transport = HttpTransport::new()?;
//!
//! let outcome = get_url(
//!     WeakHandle::new(owner),
//!     "https://example.test/data.bin",
//!     &transport,
//!     &TransferConfig::default(),
//! );
//! if let Some(data) = outcome.data() {
//!     println!("fetched {} bytes", data.len());
//! }
//! # Ok(())
//! # }
//! ```

mod error;
#[cfg(feature = "http")]
pub mod http;
mod operation;
mod status;
mod transfer;
mod transport;
mod url;

pub use error::{Result, TransferError};
pub use operation::{ProgressSink, TransferKind, TransferOperation};
pub use status::TransferStatus;
pub use transfer::{
    LoadHandle, ResultSink, TransferConfig, download_url, get_url, load_url, post_url, put_url,
};
pub use transport::{CancelToken, TransferMethod, TransferRequest, Transport};
pub use url::strip_url;
