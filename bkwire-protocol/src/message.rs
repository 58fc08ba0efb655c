//! Message type carried by a frame.

use crate::frame::{FRAME_HEADER_SIZE, LENGTH_PREFIX_SIZE};
use crate::MAGIC_VERSION;
use bytes::Bytes;
use std::fmt;

/// Opaque message category.
///
/// The codec transfers the value verbatim; the constants are conventions of
/// the RPC layer above it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKind(pub u32);

impl MessageKind {
    pub const REQUEST: MessageKind = MessageKind(0);
    pub const RESPONSE: MessageKind = MessageKind(1);
    pub const ERROR: MessageKind = MessageKind(2);

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for MessageKind {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<MessageKind> for u32 {
    fn from(kind: MessageKind) -> Self {
        kind.0
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MessageKind::REQUEST => write!(f, "request"),
            MessageKind::RESPONSE => write!(f, "response"),
            MessageKind::ERROR => write!(f, "error"),
            MessageKind(other) => write!(f, "kind({})", other),
        }
    }
}

/// A single RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Protocol version, checked against the reader's configured value.
    pub version: u16,
    /// Caller-assigned correlation id.
    pub sequence: u32,
    /// Message category.
    pub kind: MessageKind,
    /// Operation or target name.
    pub command: String,
    /// Opaque body.
    pub payload: Bytes,
}

impl Message {
    /// Creates a message stamped with [`MAGIC_VERSION`].
    pub fn new(
        sequence: u32,
        kind: impl Into<MessageKind>,
        command: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            version: MAGIC_VERSION,
            sequence,
            kind: kind.into(),
            command: command.into(),
            payload: payload.into(),
        }
    }

    /// Creates a request message.
    pub fn request(sequence: u32, command: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::new(sequence, MessageKind::REQUEST, command, payload)
    }

    pub fn with_version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    /// Builds a response to this message, keeping its version, sequence and command.
    pub fn reply(&self, payload: impl Into<Bytes>) -> Self {
        Self {
            version: self.version,
            sequence: self.sequence,
            kind: MessageKind::RESPONSE,
            command: self.command.clone(),
            payload: payload.into(),
        }
    }

    /// Returns the exact size of this message on the wire.
    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_SIZE + 2 * LENGTH_PREFIX_SIZE + self.command.len() + self.payload.len()
    }
}
