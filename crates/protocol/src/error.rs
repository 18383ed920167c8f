//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
///
/// These only surface when decoding records handed to us by the kernel or
/// when a caller addresses a slot that does not exist. Malformed portal
/// command frames are never errors; they decode to `None`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too small for the record being decoded
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// FunctionFS event type outside the known set
    #[error("Unknown FunctionFS event type: {0}")]
    UnknownEventType(u8),

    /// Slot index outside the fixed slot range
    #[error("Invalid slot index {index} (portal has {max} slots)")]
    InvalidSlot { index: usize, max: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
