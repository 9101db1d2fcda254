//! Mailboxes and fan-out message routing.
//!
//! Each worker owns one mailbox. Delivery preserves per-edge FIFO order,
//! including across Data/Control kinds: the mailbox is a single FIFO queue,
//! with bounded-capacity accounting applied only to Data sends. A Data send
//! blocks while the mailbox holds `capacity` Data messages; Control sends
//! never block and are never dropped.

use crate::message::Message;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Routing failure: the receiving side of a mailbox is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl std::fmt::Display for Disconnected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mailbox disconnected")
    }
}

impl std::error::Error for Disconnected {}

/// Data-message capacity accounting shared by a mailbox and its senders.
struct Capacity {
    limit: usize,
    state: Mutex<CapacityState>,
    freed: Condvar,
}

struct CapacityState {
    used: usize,
    closed: bool,
}

impl Capacity {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            state: Mutex::new(CapacityState {
                used: 0,
                closed: false,
            }),
            freed: Condvar::new(),
        }
    }

    /// Blocks until a Data slot is free; fails once the receiver is gone.
    fn acquire(&self) -> Result<(), Disconnected> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if state.closed {
                return Err(Disconnected);
            }
            if state.used < self.limit {
                state.used += 1;
                return Ok(());
            }
            state = self
                .freed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.used = state.used.saturating_sub(1);
        drop(state);
        self.freed.notify_one();
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed = true;
        drop(state);
        self.freed.notify_all();
    }
}

/// Sending half of a mailbox; cloned into every upstream outbox.
#[derive(Clone)]
pub struct MailboxSender {
    tx: Sender<Message>,
    capacity: Arc<Capacity>,
}

impl MailboxSender {
    /// Delivers one message.
    ///
    /// Data messages block while the mailbox is at capacity; Control
    /// messages are enqueued immediately.
    pub fn send(&self, message: Message) -> Result<(), Disconnected> {
        if !message.is_control() {
            self.capacity.acquire()?;
        }
        self.tx.send(message).map_err(|_| Disconnected)
    }
}

/// Receiving half of a mailbox; owned by exactly one worker.
pub struct Mailbox {
    rx: Receiver<Message>,
    capacity: Arc<Capacity>,
}

impl Mailbox {
    /// Receives the next message, waiting at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvTimeoutError> {
        let message = self.rx.recv_timeout(timeout)?;
        if !message.is_control() {
            self.capacity.release();
        }
        Ok(message)
    }

    /// Drains any messages already queued without blocking.
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while let Ok(message) = self.rx.try_recv() {
            if !message.is_control() {
                self.capacity.release();
            }
            count += 1;
        }
        count
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        // Wake any sender blocked on capacity; nobody will drain anymore.
        self.capacity.close();
    }
}

/// Creates a connected mailbox pair with the given Data capacity.
pub fn mailbox(capacity: usize) -> (MailboxSender, Mailbox) {
    let (tx, rx) = unbounded();
    let capacity = Arc::new(Capacity::new(capacity.max(1)));
    (
        MailboxSender {
            tx,
            capacity: capacity.clone(),
        },
        Mailbox { rx, capacity },
    )
}

/// Resolved downstream targets of one worker.
///
/// Fan-out clones the message to every target; payload buffers are shared
/// behind `Arc`s and messages are immutable, so sharing is safe.
pub struct Outbox {
    targets: Vec<(String, MailboxSender)>,
}

impl Outbox {
    pub fn new(targets: Vec<(String, MailboxSender)>) -> Self {
        Self { targets }
    }

    /// An empty outbox marks a sink.
    pub fn is_sink(&self) -> bool {
        self.targets.is_empty()
    }

    /// Names of the downstream workers.
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|(name, _)| name.as_str())
    }

    /// Delivers a message to every downstream target.
    ///
    /// Sinks discard the message. Fails if any target's mailbox is gone.
    pub fn deliver(&self, message: Message) -> Result<(), Disconnected> {
        let mut remaining = self.targets.len();
        for (_, sender) in &self.targets {
            remaining -= 1;
            if remaining == 0 {
                // Last target takes the original, no clone needed.
                return sender.send(message);
            }
            sender.send(message.clone())?;
        }
        Ok(())
    }
}
