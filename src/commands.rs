//! Subcommand implementations.

use crate::config::Config;
use bkwire_protocol::frame;
use bkwire_protocol::{BinaryWire, Message, Wire, WireConfig, WireError};
use colored::Colorize;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Binds the echo listener and serves connections until the process exits.
pub fn serve(config: &Config) -> std::io::Result<()> {
    let listener = TcpListener::bind(config.network.bind_addr)?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    serve_on(listener, config)
}

/// Accepts connections on `listener`, one thread per connection.
pub fn serve_on(listener: TcpListener, config: &Config) -> std::io::Result<()> {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let wire_config = config.wire.clone();
                let read_timeout = config.network.read_timeout();
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &wire_config, read_timeout) {
                        tracing::debug!("Connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            }
        }
    }
    Ok(())
}

/// Echoes every message on one connection back as a response.
///
/// Returns the number of messages answered once the peer hangs up. Any other
/// read error ends the connection, since the stream can no longer be trusted
/// to sit on a frame boundary.
pub fn handle_connection(
    stream: TcpStream,
    wire_config: &WireConfig,
    read_timeout: Option<Duration>,
) -> Result<u64, WireError> {
    let addr = stream.peer_addr()?;
    stream.set_read_timeout(read_timeout)?;
    let wire = BinaryWire::new(stream, wire_config)?;
    tracing::info!("Client connected: {}", addr);

    let mut answered = 0u64;
    loop {
        let msg = match wire.read() {
            Ok(msg) => msg,
            Err(e) if e.is_eof() => {
                tracing::debug!("[{}] Connection closed by client", addr);
                break;
            }
            Err(e) => {
                tracing::warn!("[{}] Dropping connection: {}", addr, e);
                if let Err(close_err) = wire.close() {
                    tracing::debug!("[{}] Close error: {}", addr, close_err);
                }
                return Err(e);
            }
        };

        tracing::debug!(
            "[{}] {} seq={} command={:?} ({} bytes)",
            addr,
            msg.kind,
            msg.sequence,
            msg.command,
            msg.payload.len()
        );
        wire.write(&msg.reply(msg.payload.clone()))?;
        answered += 1;
    }

    tracing::info!("Client disconnected: {} ({} messages)", addr, answered);
    Ok(answered)
}

/// Sends one message and waits for the reply.
pub fn send(addr: SocketAddr, config: &Config, msg: &Message) -> Result<Message, WireError> {
    tracing::debug!("Connecting to {}...", addr);
    let stream = TcpStream::connect_timeout(&addr, config.network.connect_timeout())?;
    stream.set_read_timeout(config.network.read_timeout())?;

    let wire = BinaryWire::new(stream, &config.wire)?;
    wire.write(msg)?;
    let reply = wire.read()?;
    wire.close()?;
    Ok(reply)
}

/// Appends one encoded frame to `path`, creating it if needed.
pub fn encode_to_file(
    path: &Path,
    config: &WireConfig,
    msg: &Message,
) -> Result<usize, Box<dyn std::error::Error>> {
    let encoded = frame::encode(msg, &config.limits())?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&encoded)?;
    Ok(encoded.len())
}

/// Result of decoding a capture file.
#[derive(Debug)]
pub struct Dump {
    pub messages: Vec<Message>,
    /// Bytes of an incomplete frame left at the end of the file.
    pub trailing: usize,
}

/// Decodes every frame in a capture file.
pub fn dump(path: &Path, config: &WireConfig) -> Result<Dump, Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;
    let mut decoder = config.decoder();
    decoder.extend(&data);

    let mut messages = Vec::new();
    while let Some(msg) = decoder.decode()? {
        messages.push(msg);
    }

    Ok(Dump {
        messages,
        trailing: decoder.buffered(),
    })
}

/// Prints a message in a human-readable form.
pub fn print_message(msg: &Message) {
    println!(
        "{} seq={} kind={} version={:#06x}",
        msg.command.bold(),
        msg.sequence.to_string().cyan(),
        msg.kind.to_string().yellow(),
        msg.version
    );
    match std::str::from_utf8(&msg.payload) {
        Ok(text) if !text.is_empty() => {
            println!("  payload ({} bytes): {}", msg.payload.len(), text)
        }
        Ok(_) => println!("  payload: {}", "empty".dimmed()),
        Err(_) => println!(
            "  payload ({} bytes): {}",
            msg.payload.len(),
            hex::encode(&msg.payload)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bkwire_protocol::MessageKind;
    use bytes::Bytes;

    fn spawn_listener(config: &Config) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let config = config.clone();
        thread::spawn(move || serve_on(listener, &config));
        addr
    }

    #[test]
    fn test_send_echo() {
        let config = Config::default();
        let addr = spawn_listener(&config);

        let msg = Message::request(42, "Echo", "hello");
        let reply = send(addr, &config, &msg).unwrap();

        assert_eq!(reply.sequence, 42);
        assert_eq!(reply.kind, MessageKind::RESPONSE);
        assert_eq!(reply.command, "Echo");
        assert_eq!(reply.payload.as_ref(), b"hello");
    }

    #[test]
    fn test_handle_connection_counts_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handle_connection(stream, &WireConfig::default(), None)
        });

        let wire = BinaryWire::with_defaults(TcpStream::connect(addr).unwrap()).unwrap();
        for seq in 0..3 {
            wire.write(&Message::request(seq, "Echo", Bytes::new())).unwrap();
            assert_eq!(wire.read().unwrap().sequence, seq);
        }
        drop(wire);

        assert_eq!(server.join().unwrap().unwrap(), 3);
    }

    #[test]
    fn test_handle_connection_version_mismatch() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handle_connection(stream, &WireConfig::default(), None)
        });

        let config = WireConfig::default().with_protocol_version(0x1b03);
        let wire = BinaryWire::new(TcpStream::connect(addr).unwrap(), &config).unwrap();
        wire.write(&Message::request(1, "Echo", "x").with_version(0x1b03))
            .unwrap();

        let result = server.join().unwrap();
        assert!(matches!(
            result,
            Err(WireError::ProtocolVersionMismatch { actual: 0x1b03, .. })
        ));
        // The listener closed its side.
        assert!(wire.read().is_err());
    }

    #[test]
    fn test_handle_connection_truncated_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            handle_connection(stream, &WireConfig::default(), None)
        });

        let limits = WireConfig::default().limits();
        let encoded = frame::encode(&Message::request(1, "Echo", "hello"), &limits).unwrap();
        let mut raw = TcpStream::connect(addr).unwrap();
        raw.write_all(&encoded[..12]).unwrap();
        drop(raw);

        // A frame cut short is an error, not a clean hang-up.
        let err = server.join().unwrap().unwrap_err();
        assert!(!err.is_eof());
        assert!(matches!(err, WireError::Io(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn test_encode_then_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let config = WireConfig::default();

        let first = Message::request(1, "Echo", "hello");
        let second = Message::new(2, MessageKind::ERROR, "", vec![0xFFu8, 0x00]);
        let n = encode_to_file(&path, &config, &first).unwrap();
        assert_eq!(n, first.encoded_len());
        encode_to_file(&path, &config, &second).unwrap();

        let dump = dump(&path, &config).unwrap();
        assert_eq!(dump.messages, vec![first, second]);
        assert_eq!(dump.trailing, 0);
    }

    #[test]
    fn test_dump_reports_trailing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let config = WireConfig::default();

        let encoded = frame::encode(&Message::request(1, "Echo", "hello"), &config.limits())
            .unwrap();
        let mut data = encoded.to_vec();
        data.extend_from_slice(&encoded[..7]);
        std::fs::write(&path, &data).unwrap();

        let dump = dump(&path, &config).unwrap();
        assert_eq!(dump.messages.len(), 1);
        assert_eq!(dump.trailing, 7);
    }

    #[test]
    fn test_dump_wrong_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        std::fs::write(&path, [0x01u8, 0x00, 0x00]).unwrap();

        assert!(dump(&path, &WireConfig::default()).is_err());
    }
}
