//! The `socket_client` worker: connects to a transport server and mirrors
//! its relay.

use crate::config::ResolvedParams;
use crate::error::Result;
use crate::message::{Message, Signal};
use crate::runtime::router::Outbox;
use crate::runtime::worker::{Tick, Worker, WorkerError};
use crate::transport::{
    decode_frame, encode_frame, send_frame, FrameReader, LinkConfig, READ_TIMEOUT,
};
use std::net::{Shutdown, TcpStream};
use tracing::{debug, info};

pub struct SocketClient {
    config: LinkConfig,
    stream: Option<TcpStream>,
    reader: FrameReader,
}

impl SocketClient {
    pub(crate) fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        Ok(Self {
            config: LinkConfig::from_params(params)?,
            stream: None,
            reader: FrameReader::new(),
        })
    }

    fn stream(&mut self) -> std::result::Result<&mut TcpStream, WorkerError> {
        self.stream
            .as_mut()
            .ok_or_else(|| WorkerError::fatal("not connected"))
    }
}

impl Worker for SocketClient {
    fn setup(&mut self) -> std::result::Result<(), WorkerError> {
        let addr = self.config.addr();
        let stream = TcpStream::connect(&addr)
            .map_err(|e| WorkerError::fatal(format!("cannot connect to {addr}: {e}")))?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|e| WorkerError::fatal(format!("cannot configure socket: {e}")))?;
        info!(
            addr = %addr,
            encrypted = self.config.cipher.is_some(),
            "connected to transport server"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn process(&mut self, message: Message, _out: &Outbox) -> std::result::Result<(), WorkerError> {
        let frame = encode_frame(&message, self.config.cipher.as_ref())
            .map_err(|e| WorkerError::fatal(e.to_string()))?;
        send_frame(self.stream()?, &frame)
    }

    // End-of-stream and error signals are relayed to the peer like any
    // other message, so the pipeline on the other side winds down too.
    fn wants_control(&self) -> bool {
        true
    }

    fn tick(&mut self, out: &Outbox) -> std::result::Result<Tick, WorkerError> {
        let stream = match &mut self.stream {
            Some(stream) => stream,
            // The peer finished its stream; nothing left to read.
            None => return Ok(Tick::Idle),
        };
        let lines = self.reader.pull(stream)?;
        if lines.is_empty() {
            return Ok(Tick::Idle);
        }
        let mut peer_done = false;
        for line in lines {
            let message = decode_frame(&line, self.config.cipher.as_ref())
                .map_err(|e| WorkerError::fatal(e.to_string()))?;
            if message == Message::Control(Signal::EndOfStream) {
                peer_done = true;
            }
            out.deliver(message)?;
        }
        if peer_done {
            // The close that follows the peer's end-of-stream is expected,
            // not a connection failure.
            info!("peer finished stream, closing transport connection");
            if let Some(stream) = self.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        Ok(Tick::Progress)
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("closing transport connection");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
