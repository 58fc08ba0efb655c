//! # bkwire-protocol
//!
//! Binary wire codec for bkwire RPC messages.
//!
//! This crate provides:
//! - The [`Message`] unit of exchange (version, sequence, kind, command, payload)
//! - Little-endian field codec with length-prefixed command and payload
//! - The [`Wire`] capability and its [`BinaryWire`] realization over a duplex stream
//! - An incremental [`Decoder`] for buffers that fill up over time
//! - Codec configuration (protocol version, buffer sizes, field limits)

pub mod config;
pub mod error;
pub mod frame;
pub mod message;
pub mod wire;

pub use config::{ConfigError, WireConfig};
pub use error::{Field, WireError};
pub use frame::{Decoder, FrameHeader, Limits, FRAME_HEADER_SIZE, LENGTH_PREFIX_SIZE};
pub use message::{Message, MessageKind};
pub use wire::{BinaryWire, Duplex, Wire};

/// Protocol version stamped on every frame, checked first on read.
pub const MAGIC_VERSION: u16 = 0xBEEF;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Default write buffer size (8 KiB).
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Default maximum command length (64 KiB).
pub const DEFAULT_MAX_COMMAND_LEN: u32 = 64 * 1024;

/// Default maximum payload length (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Default port for the bkwire echo listener.
pub const DEFAULT_PORT: u16 = 7411;
