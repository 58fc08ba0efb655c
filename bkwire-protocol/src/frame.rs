//! Binary frame format.
//!
//! Frame layout (all integers little-endian):
//!
//! ```text
//! +---------+----------+---------+-------------+---------+-------------+---------+
//! | version | sequence |  kind   | command_len | command | payload_len | payload |
//! | 2 bytes | 4 bytes  | 4 bytes |   4 bytes   |   var   |   4 bytes   |   var   |
//! +---------+----------+---------+-------------+---------+-------------+---------+
//! ```
//!
//! A zero length prefix denotes an empty field and is followed by no bytes.

use crate::error::{Field, WireError};
use crate::message::{Message, MessageKind};
use crate::{DEFAULT_MAX_COMMAND_LEN, DEFAULT_MAX_PAYLOAD_LEN, MAGIC_VERSION};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// Size of the fixed header in bytes (2+4+4 = 10).
pub const FRAME_HEADER_SIZE: usize = 10;

/// Size of a variable-length field's length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Upper bounds on declared field lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_command_len: u32,
    pub max_payload_len: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_command_len: DEFAULT_MAX_COMMAND_LEN,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl Limits {
    pub fn max_for(&self, field: Field) -> u32 {
        match field {
            Field::Command => self.max_command_len,
            Field::Payload => self.max_payload_len,
        }
    }

    /// Checks that an outgoing message can be framed under these limits.
    pub fn check_outgoing(&self, msg: &Message) -> Result<(), WireError> {
        for (field, len) in [
            (Field::Command, msg.command.len()),
            (Field::Payload, msg.payload.len()),
        ] {
            let max = self.max_for(field);
            if len > max as usize {
                return Err(WireError::InvalidArgument(format!(
                    "{} is {} bytes (max {})",
                    field, len, max
                )));
            }
        }
        Ok(())
    }

    /// Checks a declared incoming length prefix.
    fn check_incoming(&self, field: Field, size: u32) -> Result<(), WireError> {
        let max = self.max_for(field);
        if size > max {
            tracing::warn!("Rejecting {} length prefix {} (max {})", field, size, max);
            return Err(WireError::FrameTooLarge { field, size, max });
        }
        Ok(())
    }
}

/// Fixed-width header fields of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u16,
    pub sequence: u32,
    pub kind: MessageKind,
}

impl FrameHeader {
    pub fn of(msg: &Message) -> Self {
        Self {
            version: msg.version,
            sequence: msg.sequence,
            kind: msg.kind,
        }
    }

    /// Encodes the header into a buffer.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.version);
        buf.put_u32_le(self.sequence);
        buf.put_u32_le(self.kind.value());
    }

    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        let mut buf = &mut out[..];
        self.encode(&mut buf);
        out
    }

    /// Reads a header, rejecting a version other than `expected` before
    /// touching the remaining fields.
    ///
    /// A stream that ends before the first byte yields [`WireError::Closed`].
    pub fn read_from<R: Read>(reader: &mut R, expected: u16) -> Result<Self, WireError> {
        let version = read_version(reader)?;
        check_version(version, expected)?;

        let sequence = u32::from_le_bytes(read_array(reader)?);
        let kind = MessageKind(u32::from_le_bytes(read_array(reader)?));

        Ok(Self {
            version,
            sequence,
            kind,
        })
    }
}

fn read_version<R: Read>(reader: &mut R) -> Result<u16, WireError> {
    let mut buf = [0u8; 2];
    loop {
        match reader.read(&mut buf[..1]) {
            Ok(0) => return Err(WireError::Closed),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    reader.read_exact(&mut buf[1..])?;
    Ok(u16::from_le_bytes(buf))
}

fn check_version(version: u16, expected: u16) -> Result<(), WireError> {
    if version != expected {
        tracing::warn!(
            "Wrong protocol version received: {:#06x} (expected {:#06x})",
            version,
            expected
        );
        return Err(WireError::ProtocolVersionMismatch {
            expected,
            actual: version,
        });
    }
    Ok(())
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N], WireError> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Writes a length-prefixed field.
///
/// The caller guarantees `data.len()` fits in a `u32`; see [`Limits::check_outgoing`].
pub fn write_field<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    writer.write_all(&(data.len() as u32).to_le_bytes())?;
    if !data.is_empty() {
        writer.write_all(data)?;
    }
    Ok(())
}

fn read_field_vec<R: Read>(
    reader: &mut R,
    field: Field,
    limits: &Limits,
) -> Result<Vec<u8>, WireError> {
    let len = u32::from_le_bytes(read_array(reader)?);
    if len == 0 {
        return Ok(Vec::new());
    }
    limits.check_incoming(field, len)?;

    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

/// Reads a length-prefixed field.
///
/// The declared length is checked against `limits` before anything is
/// allocated. A stream that ends before the declared length is reached
/// yields an `UnexpectedEof` I/O error.
pub fn read_field<R: Read>(
    reader: &mut R,
    field: Field,
    limits: &Limits,
) -> Result<Bytes, WireError> {
    read_field_vec(reader, field, limits).map(Bytes::from)
}

/// Writes a whole frame. Does not flush.
pub fn write_message<W: Write>(
    writer: &mut W,
    msg: &Message,
    limits: &Limits,
) -> Result<(), WireError> {
    limits.check_outgoing(msg)?;
    write_frame(writer, msg)?;
    Ok(())
}

/// Writes a frame already checked against the limits.
pub(crate) fn write_frame<W: Write>(writer: &mut W, msg: &Message) -> io::Result<()> {
    writer.write_all(&FrameHeader::of(msg).to_bytes())?;
    write_field(writer, msg.command.as_bytes())?;
    write_field(writer, &msg.payload)
}

/// Reads a whole frame.
pub fn read_message<R: Read>(
    reader: &mut R,
    expected_version: u16,
    limits: &Limits,
) -> Result<Message, WireError> {
    let header = FrameHeader::read_from(reader, expected_version)?;

    let command = read_field_vec(reader, Field::Command, limits)?;
    let command = String::from_utf8(command).map_err(|_| WireError::InvalidUtf8)?;
    let payload = read_field(reader, Field::Payload, limits)?;

    Ok(Message {
        version: header.version,
        sequence: header.sequence,
        kind: header.kind,
        command,
        payload,
    })
}

/// Encodes a frame into a new buffer.
pub fn encode(msg: &Message, limits: &Limits) -> Result<BytesMut, WireError> {
    limits.check_outgoing(msg)?;

    let mut buf = BytesMut::with_capacity(msg.encoded_len());
    FrameHeader::of(msg).encode(&mut buf);
    buf.put_u32_le(msg.command.len() as u32);
    buf.put_slice(msg.command.as_bytes());
    buf.put_u32_le(msg.payload.len() as u32);
    buf.put_slice(&msg.payload);
    Ok(buf)
}

/// Incremental frame decoder over an accumulating buffer.
///
/// Bytes are only consumed once a complete frame is present, so callers can
/// feed data as it arrives and call [`Decoder::decode`] after each chunk.
pub struct Decoder {
    buffer: BytesMut,
    version: u16,
    limits: Limits,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_limits(MAGIC_VERSION, Limits::default())
    }

    pub fn with_limits(version: u16, limits: Limits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            version,
            limits,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// Returns `Ok(Some(msg))` if a complete frame was decoded, `Ok(None)` if
    /// more data is needed, or `Err` on protocol errors.
    pub fn decode(&mut self) -> Result<Option<Message>, WireError> {
        let buf = &self.buffer[..];
        if buf.len() < 2 {
            return Ok(None);
        }

        let version = u16::from_le_bytes([buf[0], buf[1]]);
        check_version(version, self.version)?;

        let command_at = FRAME_HEADER_SIZE + LENGTH_PREFIX_SIZE;
        if buf.len() < command_at {
            return Ok(None);
        }
        let sequence = le_u32(buf, 2);
        let kind = MessageKind(le_u32(buf, 6));

        let command_len = le_u32(buf, FRAME_HEADER_SIZE);
        self.limits.check_incoming(Field::Command, command_len)?;

        let payload_prefix_at = command_at + command_len as usize;
        if buf.len() < payload_prefix_at + LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let payload_len = le_u32(buf, payload_prefix_at);
        self.limits.check_incoming(Field::Payload, payload_len)?;

        let total_len = payload_prefix_at + LENGTH_PREFIX_SIZE + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        self.buffer.advance(command_at);
        let command = self.buffer.split_to(command_len as usize).freeze();
        self.buffer.advance(LENGTH_PREFIX_SIZE);
        let payload = self.buffer.split_to(payload_len as usize).freeze();

        let command = std::str::from_utf8(&command)
            .map_err(|_| WireError::InvalidUtf8)?
            .to_owned();

        Ok(Some(Message {
            version,
            sequence,
            kind,
            command,
            payload,
        }))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn encode_default(msg: &Message) -> BytesMut {
        encode(msg, &Limits::default()).unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let msg = Message::new(42, MessageKind::RESPONSE, "Echo", "hello");
        let encoded = encode_default(&msg);

        let mut expected = Vec::new();
        expected.extend_from_slice(&[0xEF, 0xBE]);
        expected.extend_from_slice(&[42, 0, 0, 0]);
        expected.extend_from_slice(&[1, 0, 0, 0]);
        expected.extend_from_slice(&[4, 0, 0, 0]);
        expected.extend_from_slice(b"Echo");
        expected.extend_from_slice(&[5, 0, 0, 0]);
        expected.extend_from_slice(b"hello");

        assert_eq!(&encoded[..], &expected[..]);
        assert_eq!(encoded.len(), msg.encoded_len());
    }

    #[test]
    fn test_empty_fields_layout() {
        let msg = Message::new(1, MessageKind::REQUEST, "", Bytes::new());
        let encoded = encode_default(&msg);

        assert_eq!(
            &encoded[..],
            &[0xEF, 0xBE, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );

        let decoded = read_message(&mut &encoded[..], MAGIC_VERSION, &Limits::default()).unwrap();
        assert_eq!(decoded.command, "");
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_write_message_matches_encode() {
        let msg = Message::new(7, MessageKind(99), "Store.Put", vec![0u8, 1, 2, 255]);
        let mut out = Vec::new();
        write_message(&mut out, &msg, &Limits::default()).unwrap();

        assert_eq!(out, encode_default(&msg).to_vec());
    }

    #[test]
    fn test_read_message_roundtrip() {
        let msg = Message::new(u32::MAX, MessageKind(u32::MAX), "héllo wörld", vec![9u8; 1000]);
        let encoded = encode_default(&msg);

        let decoded = read_message(&mut &encoded[..], MAGIC_VERSION, &Limits::default()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_version_mismatch_stops_reading() {
        // Only the version is present; nothing after it has to be valid.
        let data = 0x1234u16.to_le_bytes();
        let result = read_message(&mut &data[..], MAGIC_VERSION, &Limits::default());

        assert!(matches!(
            result,
            Err(WireError::ProtocolVersionMismatch {
                expected: MAGIC_VERSION,
                actual: 0x1234
            })
        ));
    }

    #[test]
    fn test_custom_expected_version() {
        let msg = Message::request(1, "Ping", Bytes::new()).with_version(3);
        let encoded = encode_default(&msg);

        let decoded = read_message(&mut &encoded[..], 3, &Limits::default()).unwrap();
        assert_eq!(decoded.version, 3);

        let result = read_message(&mut &encoded[..], MAGIC_VERSION, &Limits::default());
        assert!(matches!(
            result,
            Err(WireError::ProtocolVersionMismatch { actual: 3, .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let encoded = encode_default(&Message::request(1, "Ping", "x"));

        let result = read_message(&mut &encoded[..0], MAGIC_VERSION, &Limits::default());
        assert!(matches!(result, Err(WireError::Closed)));

        for cut in 1..FRAME_HEADER_SIZE {
            let result = read_message(&mut &encoded[..cut], MAGIC_VERSION, &Limits::default());
            match result {
                Err(WireError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
                other => panic!("cut at {}: unexpected {:?}", cut, other),
            }
        }
    }

    #[test]
    fn test_truncated_field() {
        let encoded = encode_default(&Message::request(1, "Echo", "hello"));

        // Drop the last payload byte.
        let result = read_message(
            &mut &encoded[..encoded.len() - 1],
            MAGIC_VERSION,
            &Limits::default(),
        );
        assert!(matches!(result, Err(WireError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof));

        // Cut inside the command.
        let result = read_message(
            &mut &encoded[..FRAME_HEADER_SIZE + LENGTH_PREFIX_SIZE + 2],
            MAGIC_VERSION,
            &Limits::default(),
        );
        assert!(matches!(result, Err(WireError::Io(_))));
    }

    #[test]
    fn test_oversize_prefix_rejected_before_read() {
        let limits = Limits {
            max_command_len: 8,
            max_payload_len: 16,
        };

        // Command prefix declares 4 GiB with no bytes following.
        let mut data = Vec::new();
        FrameHeader::of(&Message::request(1, "", Bytes::new())).encode(&mut data);
        data.extend_from_slice(&u32::MAX.to_le_bytes());

        let result = read_message(&mut &data[..], MAGIC_VERSION, &limits);
        assert!(matches!(
            result,
            Err(WireError::FrameTooLarge {
                field: Field::Command,
                size: u32::MAX,
                max: 8
            })
        ));

        let encoded = encode_default(&Message::request(1, "ok", vec![0u8; 17]));
        let result = read_message(&mut &encoded[..], MAGIC_VERSION, &limits);
        assert!(matches!(
            result,
            Err(WireError::FrameTooLarge {
                field: Field::Payload,
                size: 17,
                ..
            })
        ));
    }

    #[test]
    fn test_limit_is_inclusive() {
        let limits = Limits {
            max_command_len: 4,
            max_payload_len: 5,
        };
        let msg = Message::request(1, "Echo", "hello");
        let encoded = encode(&msg, &limits).unwrap();

        let decoded = read_message(&mut &encoded[..], MAGIC_VERSION, &limits).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_check_outgoing() {
        let limits = Limits {
            max_command_len: 3,
            max_payload_len: 3,
        };

        let result = encode(&Message::request(1, "Echo", Bytes::new()), &limits);
        assert!(matches!(result, Err(WireError::InvalidArgument(ref m)) if m.contains("command")));

        let mut out = Vec::new();
        let result = write_message(&mut out, &Message::request(1, "", "hello"), &limits);
        assert!(matches!(result, Err(WireError::InvalidArgument(ref m)) if m.contains("payload")));
        assert!(out.is_empty());
    }

    #[test]
    fn test_invalid_utf8_command() {
        let mut data = Vec::new();
        FrameHeader::of(&Message::request(1, "", Bytes::new())).encode(&mut data);
        write_field(&mut data, &[0xFF, 0xFE]).unwrap();
        write_field(&mut data, b"").unwrap();

        let result = read_message(&mut &data[..], MAGIC_VERSION, &Limits::default());
        assert!(matches!(result, Err(WireError::InvalidUtf8)));
    }

    #[test]
    fn test_header_to_bytes() {
        let header = FrameHeader {
            version: 0x0102,
            sequence: 0x03040506,
            kind: MessageKind(0x0708090A),
        };
        assert_eq!(
            header.to_bytes(),
            [0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 0x0A, 0x09, 0x08, 0x07]
        );
        assert_eq!(
            FrameHeader::read_from(&mut &header.to_bytes()[..], 0x0102).unwrap(),
            header
        );
    }

    #[test]
    fn test_decoder_partial() {
        let msg = Message::request(5, "Echo", "hello");
        let encoded = encode_default(&msg);

        let mut decoder = Decoder::new();
        for (i, byte) in encoded.iter().enumerate() {
            assert!(decoder.decode().unwrap().is_none(), "early frame at {}", i);
            decoder.extend(&[*byte]);
        }

        assert_eq!(decoder.decode().unwrap().unwrap(), msg);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_multiple_frames() {
        let msg1 = Message::request(1, "A", "one");
        let msg2 = Message::new(2, MessageKind::RESPONSE, "", Bytes::new());

        let mut decoder = Decoder::new();
        decoder.extend(&encode_default(&msg1));
        decoder.extend(&encode_default(&msg2));
        decoder.extend(&[0xEF]);

        assert_eq!(decoder.decode().unwrap().unwrap(), msg1);
        assert_eq!(decoder.decode().unwrap().unwrap(), msg2);
        assert!(decoder.decode().unwrap().is_none());
        assert_eq!(decoder.buffered(), 1);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_version_mismatch() {
        let mut decoder = Decoder::new();
        decoder.extend(&[0x00, 0x01]);

        let result = decoder.decode();
        assert!(matches!(
            result,
            Err(WireError::ProtocolVersionMismatch { actual: 0x0100, .. })
        ));
    }

    #[test]
    fn test_decoder_oversize() {
        let limits = Limits {
            max_command_len: 64,
            max_payload_len: 4,
        };
        let mut decoder = Decoder::with_limits(MAGIC_VERSION, limits);
        let encoded = encode_default(&Message::request(1, "Echo", "hello"));

        // The payload prefix alone is enough to reject the frame.
        decoder.extend(&encoded[..FRAME_HEADER_SIZE + 2 * LENGTH_PREFIX_SIZE + 4]);
        let result = decoder.decode();
        assert!(matches!(
            result,
            Err(WireError::FrameTooLarge {
                field: Field::Payload,
                size: 5,
                max: 4
            })
        ));
    }

    #[test]
    fn test_decoder_invalid_utf8_command() {
        let mut data = Vec::new();
        FrameHeader::of(&Message::request(1, "", Bytes::new())).encode(&mut data);
        write_field(&mut data, &[0xC3, 0x28]).unwrap();
        write_field(&mut data, b"body").unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&data);
        assert!(matches!(decoder.decode(), Err(WireError::InvalidUtf8)));
    }

    #[test]
    fn test_decoder_default() {
        let decoder = Decoder::default();
        assert_eq!(decoder.buffered(), 0);
    }
}
