//! Codec error types.

use std::fmt;
use std::io;
use thiserror::Error;

/// Variable-length field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Command,
    Payload,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Command => write!(f, "command"),
            Field::Payload => write!(f, "payload"),
        }
    }
}

/// Errors that can occur while writing or reading a frame.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol version mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ProtocolVersionMismatch { expected: u16, actual: u16 },

    #[error("{field} too large: {size} bytes (max {max})")]
    FrameTooLarge { field: Field, size: u32, max: u32 },

    #[error("invalid UTF-8 in command")]
    InvalidUtf8,

    /// The peer closed the stream before the first byte of a frame.
    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// Returns whether the connection must be dropped after this error.
    ///
    /// Everything except `InvalidArgument` leaves the stream at an unknown
    /// offset relative to frame boundaries. The protocol has no way to
    /// resynchronize, so the only recovery is a new connection.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, WireError::InvalidArgument(_))
    }

    /// Returns whether the peer closed the stream on a frame boundary.
    ///
    /// A stream that ends partway through a frame is an `UnexpectedEof` I/O
    /// error instead, and does not count.
    pub fn is_eof(&self) -> bool {
        matches!(self, WireError::Closed)
    }

    pub(crate) fn not_connected() -> Self {
        WireError::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "wire is closed",
        ))
    }

    pub(crate) fn desynchronized() -> Self {
        WireError::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "wire is unusable after a failed frame",
        ))
    }
}
