//! TCP transport endpoints bridging two pipelines.
//!
//! Both endpoints relay in each direction: local upstream messages are
//! serialized into envelope frames and written to the peer; frames from the
//! peer are deserialized and delivered downstream as if locally produced.
//! Frames are newline-delimited JSON (see [`envelope`]).

pub mod client;
pub mod envelope;
pub mod server;

pub use client::SocketClient;
pub use envelope::{decode_frame, encode_frame, EnvelopeCipher, TransportEnvelope};
pub use server::SocketServer;

use crate::config::ResolvedParams;
use crate::defaults;
use crate::error::Result;
use crate::runtime::worker::{BuildCtx, WorkerError, WorkerRegistry};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Upper bound on a single frame; anything longer is a corrupt link.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// How long a socket read blocks before the worker loop gets control back.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Shared endpoint configuration.
pub(crate) struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub cipher: Option<EnvelopeCipher>,
}

impl LinkConfig {
    pub fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        let cipher = match params.opt_str("key")? {
            Some(secret) => Some(EnvelopeCipher::from_secret(&secret)?),
            // No key: plaintext link, trusted network assumed.
            None => None,
        };
        Ok(Self {
            host: params.str_or("host", defaults::TRANSPORT_HOST)?,
            port: params.port_or("port", defaults::TRANSPORT_PORT)?,
            cipher,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Accumulates raw socket bytes and yields complete frame lines.
pub(crate) struct FrameReader {
    buf: Vec<u8>,
    hangup: bool,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            hangup: false,
        }
    }

    /// Reads whatever the socket has and returns the complete lines seen so
    /// far. Peer hangup and frame overflow are fatal; frames already
    /// buffered when the peer hangs up are still returned first, so a
    /// final end-of-stream frame is never lost to the close that follows
    /// it.
    pub fn pull(&mut self, stream: &mut TcpStream) -> std::result::Result<Vec<String>, WorkerError> {
        let mut scratch = [0u8; 4096];
        while !self.hangup {
            match stream.read(&mut scratch) {
                Ok(0) => {
                    self.hangup = true;
                    break;
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&scratch[..n]);
                    if self.buf.len() > MAX_FRAME_BYTES {
                        return Err(WorkerError::fatal("oversized frame on transport link"));
                    }
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WorkerError::fatal(format!("socket read failed: {e}"))),
            }
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            match String::from_utf8(line) {
                Ok(text) => {
                    let text = text.trim_end_matches(['\n', '\r']).to_string();
                    if !text.is_empty() {
                        lines.push(text);
                    }
                }
                Err(_) => return Err(WorkerError::fatal("non-UTF-8 frame on transport link")),
            }
        }
        if lines.is_empty() && self.hangup {
            return Err(WorkerError::fatal("connection closed by peer"));
        }
        Ok(lines)
    }
}

/// Writes one frame line to the peer.
pub(crate) fn send_frame(
    stream: &mut TcpStream,
    frame: &str,
) -> std::result::Result<(), WorkerError> {
    stream
        .write_all(frame.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .and_then(|_| stream.flush())
        .map_err(|e| WorkerError::fatal(format!("socket write failed: {e}")))
}

pub fn register(registry: &mut WorkerRegistry) {
    registry.register("socket_server", |ctx: &BuildCtx| {
        Ok(Box::new(SocketServer::from_params(&ctx.params)?))
    });
    registry.register("socket_client", |ctx: &BuildCtx| {
        Ok(Box::new(SocketClient::from_params(&ctx.params)?))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn frame_reader_splits_lines_and_keeps_partials() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"first\nsec").unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(50));
            stream.write_all(b"ond\n").unwrap();
            stream.flush().unwrap();
            // Keep the connection open until the reader is done.
            thread::sleep(Duration::from_millis(200));
        });

        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
        let mut reader = FrameReader::new();

        let mut got = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while got.len() < 2 && std::time::Instant::now() < deadline {
            got.extend(reader.pull(&mut stream).unwrap());
        }
        assert_eq!(got, vec!["first".to_string(), "second".to_string()]);
        writer.join().unwrap();
    }

    #[test]
    fn frame_reader_yields_final_frames_before_reporting_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"last words\n").unwrap();
            stream.flush().unwrap();
        });

        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
        writer.join().unwrap();

        let mut reader = FrameReader::new();
        let mut got = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let hangup = loop {
            match reader.pull(&mut stream) {
                Ok(lines) => {
                    got.extend(lines);
                    assert!(std::time::Instant::now() < deadline, "hangup never reported");
                }
                Err(err) => break err,
            }
        };
        // The frame written just before the close still comes through.
        assert_eq!(got, vec!["last words".to_string()]);
        assert!(matches!(hangup, WorkerError::Fatal(msg) if msg.contains("closed")));
    }

    #[test]
    fn frame_reader_reports_peer_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let writer = thread::spawn(move || {
            let stream = TcpStream::connect(addr).unwrap();
            drop(stream);
        });

        let (mut stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
        writer.join().unwrap();

        let mut reader = FrameReader::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            match reader.pull(&mut stream) {
                Err(WorkerError::Fatal(msg)) => {
                    assert!(msg.contains("closed"));
                    break;
                }
                Ok(_) if std::time::Instant::now() < deadline => continue,
                other => panic!("expected hangup, got {other:?}"),
            }
        }
    }
}
