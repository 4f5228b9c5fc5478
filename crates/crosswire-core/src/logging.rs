//! Logging facilities for Crosswire.
//!
//! Crosswire uses the `tracing` crate for instrumentation. To see logs,
//! install a tracing subscriber in your application:
//!
//! ```ignore
//! use tracing_subscriber;
//!
//! fn main() {
//!     tracing_subscriber::fmt::init();
//!     // Your application code...
//! }
//! ```
//!
//! Use the constants in [`targets`] with `tracing` directives to filter
//! logs by subsystem, e.g. `RUST_LOG=crosswire_core::queue=trace`.

/// Target names for log filtering.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "crosswire_core";
    /// Owner registry and weak handles.
    pub const HANDLE: &str = "crosswire_core::handle";
    /// Pending task dispatch.
    pub const PENDING: &str = "crosswire_core::pending";
    /// Event queue.
    pub const QUEUE: &str = "crosswire_core::queue";
    /// Cooperative wait loop.
    pub const WAIT: &str = "crosswire_core::wait";
}
