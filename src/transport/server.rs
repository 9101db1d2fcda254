//! The `socket_server` worker: accepts one remote client and relays in both
//! directions.

use crate::config::ResolvedParams;
use crate::error::Result;
use crate::message::{Message, Signal};
use crate::runtime::router::Outbox;
use crate::runtime::worker::{Tick, Worker, WorkerError};
use crate::transport::{
    decode_frame, encode_frame, send_frame, FrameReader, LinkConfig, READ_TIMEOUT,
};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use tracing::{debug, info, trace, warn};

pub struct SocketServer {
    config: LinkConfig,
    listener: Option<TcpListener>,
    client: Option<ActiveClient>,
}

struct ActiveClient {
    stream: TcpStream,
    reader: FrameReader,
    peer: SocketAddr,
}

impl SocketServer {
    pub(crate) fn from_params(params: &ResolvedParams<'_>) -> Result<Self> {
        Ok(Self {
            config: LinkConfig::from_params(params)?,
            listener: None,
            client: None,
        })
    }

    /// The bound address, once setup has run. With port 0 this is where the
    /// OS actually put the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn has_client(&self) -> bool {
        self.client.is_some()
    }

    /// Accepts a waiting connection; refuses one while a client is active.
    fn accept_pending(&mut self) -> std::result::Result<(), WorkerError> {
        let listener = match &self.listener {
            Some(listener) => listener,
            None => return Err(WorkerError::fatal("server not bound")),
        };
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if self.client.is_some() {
                        warn!(%peer, "refusing second client, one is already active");
                        let _ = stream.shutdown(Shutdown::Both);
                        continue;
                    }
                    stream
                        .set_nonblocking(false)
                        .and_then(|_| stream.set_read_timeout(Some(READ_TIMEOUT)))
                        .and_then(|_| stream.set_nodelay(true))
                        .map_err(|e| WorkerError::fatal(format!("cannot configure client socket: {e}")))?;
                    info!(%peer, "client connected");
                    self.client = Some(ActiveClient {
                        stream,
                        reader: FrameReader::new(),
                        peer,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WorkerError::fatal(format!("accept failed: {e}"))),
            }
        }
    }
}

impl Worker for SocketServer {
    fn setup(&mut self) -> std::result::Result<(), WorkerError> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .map_err(|e| WorkerError::fatal(format!("cannot bind {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| WorkerError::fatal(format!("cannot configure listener: {e}")))?;
        info!(
            addr = %addr,
            encrypted = self.config.cipher.is_some(),
            "transport server listening"
        );
        self.listener = Some(listener);
        Ok(())
    }

    fn process(&mut self, message: Message, _out: &Outbox) -> std::result::Result<(), WorkerError> {
        let client = match &mut self.client {
            Some(client) => client,
            None => {
                // Nobody on the other end yet; the stream is live-only.
                trace!("no client connected, dropping message");
                return Ok(());
            }
        };
        let frame = encode_frame(&message, self.config.cipher.as_ref())
            .map_err(|e| WorkerError::fatal(e.to_string()))?;
        send_frame(&mut client.stream, &frame)
    }

    // End-of-stream and error signals are relayed to the peer like any
    // other message, so the pipeline on the other side winds down too.
    fn wants_control(&self) -> bool {
        true
    }

    fn tick(&mut self, out: &Outbox) -> std::result::Result<Tick, WorkerError> {
        self.accept_pending()?;

        let client = match &mut self.client {
            Some(client) => client,
            None => return Ok(Tick::Idle),
        };

        let lines = client.reader.pull(&mut client.stream)?;
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
            if let Some(client) = self.client.take() {
                info!(peer = %client.peer, "peer finished stream, closing connection");
                let _ = client.stream.shutdown(Shutdown::Both);
            }
        }
        Ok(Tick::Progress)
    }

    fn shutdown(&mut self) {
        if let Some(client) = self.client.take() {
            debug!(peer = %client.peer, "closing client connection");
            let _ = client.stream.shutdown(Shutdown::Both);
        }
        self.listener = None;
    }
}
