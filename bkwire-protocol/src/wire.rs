//! The `Wire` capability and its binary realization over a duplex stream.

use crate::config::WireConfig;
use crate::error::WireError;
use crate::frame::{self, Limits};
use crate::message::Message;
use parking_lot::Mutex;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

/// Something that can send and receive whole messages.
///
/// RPC dispatch depends on this trait rather than on a concrete framing, so
/// other encodings can be dropped in without touching callers.
pub trait Wire: Send + Sync {
    /// Writes one message and flushes it to the stream.
    fn write(&self, msg: &Message) -> Result<(), WireError>;

    /// Blocks until one complete message has been read.
    fn read(&self) -> Result<Message, WireError>;

    /// Closes the underlying stream.
    fn close(&self) -> Result<(), WireError>;
}

/// A blocking bidirectional byte stream.
pub trait Duplex: Read + Write + Send + Sized {
    /// Returns a new handle to the same underlying stream.
    fn try_clone(&self) -> io::Result<Self>;

    /// Shuts down both directions of the stream.
    fn close(&self) -> io::Result<()>;
}

impl Duplex for TcpStream {
    fn try_clone(&self) -> io::Result<Self> {
        TcpStream::try_clone(self)
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(unix)]
impl Duplex for std::os::unix::net::UnixStream {
    fn try_clone(&self) -> io::Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self)
    }

    fn close(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Binary framing over a buffered duplex stream.
///
/// The reader and writer are independent buffers over separate handles to
/// the same stream, each behind its own lock: one thread can block in
/// [`Wire::read`] while another calls [`Wire::write`]. Concurrent writers
/// (or readers) are serialized, so frames never interleave.
///
/// Any error other than [`WireError::InvalidArgument`] leaves the stream at
/// an unknown offset, so it marks the wire broken and every later call fails.
/// A failed write also shuts the stream down, which keeps the torn frame in
/// the write buffer from reaching the peer.
///
/// Dropping the wire drops every handle, which closes the stream.
pub struct BinaryWire<S: Duplex> {
    conn: S,
    reader: Mutex<BufReader<S>>,
    writer: Mutex<BufWriter<S>>,
    protocol_version: u16,
    limits: Limits,
    closed: AtomicBool,
    broken: AtomicBool,
}

impl<S: Duplex> BinaryWire<S> {
    /// Creates a wire that owns `stream` until it is closed or dropped.
    pub fn new(stream: S, config: &WireConfig) -> Result<Self, WireError> {
        let reader = BufReader::with_capacity(config.read_buffer_size, stream.try_clone()?);
        let writer = BufWriter::with_capacity(config.write_buffer_size, stream.try_clone()?);

        Ok(Self {
            conn: stream,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            protocol_version: config.protocol_version,
            limits: config.limits(),
            closed: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        })
    }

    /// Creates a wire with the default configuration.
    pub fn with_defaults(stream: S) -> Result<Self, WireError> {
        Self::new(stream, &WireConfig::default())
    }

    /// Returns the underlying stream, e.g. to set timeouts.
    pub fn get_ref(&self) -> &S {
        &self.conn
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns whether an earlier frame failed partway.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), WireError> {
        if self.is_closed() {
            return Err(WireError::not_connected());
        }
        if self.is_broken() {
            return Err(WireError::desynchronized());
        }
        Ok(())
    }

    fn mark_broken(&self, err: &WireError) {
        if err.is_connection_fatal() && !self.broken.swap(true, Ordering::AcqRel) {
            tracing::debug!("Wire broken: {}", err);
        }
    }
}

impl<S: Duplex + Sync> Wire for BinaryWire<S> {
    fn write(&self, msg: &Message) -> Result<(), WireError> {
        self.limits.check_outgoing(msg)?;
        self.ensure_open()?;

        let mut writer = self.writer.lock();
        let result = frame::write_frame(&mut *writer, msg).and_then(|()| writer.flush());
        if let Err(e) = result {
            let err = WireError::Io(e);
            self.mark_broken(&err);
            if let Err(e) = self.conn.close() {
                tracing::debug!("Shutdown after failed write: {}", e);
            }
            return Err(err);
        }

        tracing::trace!(
            "Wrote frame seq={} kind={} command={:?} payload={} bytes",
            msg.sequence,
            msg.kind,
            msg.command,
            msg.payload.len()
        );
        Ok(())
    }

    fn read(&self) -> Result<Message, WireError> {
        self.ensure_open()?;

        let mut reader = self.reader.lock();
        let msg = frame::read_message(&mut *reader, self.protocol_version, &self.limits)
            .map_err(|e| {
                self.mark_broken(&e);
                e
            })?;

        tracing::trace!(
            "Read frame seq={} kind={} command={:?} payload={} bytes",
            msg.sequence,
            msg.kind,
            msg.command,
            msg.payload.len()
        );
        Ok(msg)
    }

    fn close(&self) -> Result<(), WireError> {
        self.closed.store(true, Ordering::Release);
        tracing::debug!("Closing wire");
        self.conn.close()?;
        Ok(())
    }
}
