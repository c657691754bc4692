//! Error types for framewire.

use thiserror::Error;

use crate::field::FieldName;

/// Main error type for all framewire operations.
///
/// RX-path mismatches (corrupted constants, LEN/ALEN/TYPE/CRC failures) are
/// recovered locally by resynchronisation and never surface here; this enum
/// covers construction, TX and endpoint boundaries.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Contradiction in a field layout, detected at construction.
    #[error("layout error: {0}")]
    Layout(String),

    /// A referenced field name is not part of the layout.
    #[error("no field named {0} in layout")]
    NoSuchField(FieldName),

    /// A type code (received or inferred) has no payload map entry.
    #[error("type code {0} has no payload map entry")]
    UnknownPayloadType(u32),

    /// A provided value does not fit its field.
    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    /// A variable payload exceeds the field's upper bound.
    #[error("payload of {got} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Provided payload size.
        got: usize,
        /// Field upper bound.
        max: usize,
    },

    /// A value was supplied for a field that cannot accept one.
    #[error("field {0}: {1}")]
    InvalidValue(FieldName, String),

    /// A field with no matcher and no constant was not provided.
    #[error("required field {0} was not provided")]
    MissingField(FieldName),

    /// No output transport has been installed.
    #[error("no transport installed")]
    NoTransport,

    /// Transport-level failure (open, write, serial I/O).
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// A request did not receive its response in time.
    #[error("request timed out")]
    Timeout,

    /// The endpoint has been shut down.
    #[error("endpoint is shut down")]
    Shutdown,
}

/// Result type alias using [`FrameError`].
pub type Result<T> = std::result::Result<T, FrameError>;
