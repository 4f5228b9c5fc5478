//! Error types for the Crosswire core.

use std::fmt;

/// Errors produced by the core queue and wait primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The event queue has been closed and no longer accepts tasks.
    QueueClosed,
    /// A cooperative wait refused to nest beyond the configured depth budget.
    WaitDepthExceeded,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueClosed => write!(f, "Event queue is closed"),
            Self::WaitDepthExceeded => {
                write!(f, "Cooperative wait nesting exceeded the depth budget")
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// A specialized Result type for Crosswire core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
