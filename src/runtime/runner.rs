//! Per-worker thread loop: lifecycle state machine and failure propagation.

use crate::message::{Message, Signal};
use crate::runtime::barrier::{ReadyBarrier, StartGate, StartOrder};
use crate::runtime::router::{Mailbox, Outbox};
use crate::runtime::worker::{InstanceStatus, Tick, Worker, WorkerError, WorkerState};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long a worker waits on its mailbox (and idles between producer
/// ticks) before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared stop flag; requesting a stop asks every worker to wind down
/// gracefully.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one worker thread needs.
pub(crate) struct RunnerCtx {
    pub name: String,
    pub worker: Box<dyn Worker>,
    pub mailbox: Mailbox,
    /// Whether any worker forwards into this mailbox. Pure producers skip
    /// the mailbox wait and run on their tick loop.
    pub has_upstream: bool,
    pub outbox: Outbox,
    pub status: InstanceStatus,
    pub barrier: Arc<ReadyBarrier>,
    pub gate: Arc<StartGate>,
    pub shutdown: ShutdownHandle,
}

/// A spawned worker instance.
#[derive(Debug)]
pub struct WorkerRunner {
    name: String,
    handle: Option<JoinHandle<()>>,
    status: InstanceStatus,
}

impl WorkerRunner {
    /// Spawns the worker on its own named thread.
    pub(crate) fn spawn(ctx: RunnerCtx) -> std::io::Result<Self> {
        let name = ctx.name.clone();
        let status = ctx.status.clone();
        let handle = thread::Builder::new()
            .name(format!("worker-{name}"))
            .spawn(move || run(ctx))?;
        Ok(Self {
            name,
            handle: Some(handle),
            status,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> &InstanceStatus {
        &self.status
    }

    /// Waits for the worker thread to finish.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                // A panic is an unrecoverable worker error like any other.
                self.status.set_error("worker thread panicked");
                self.status.set_state(WorkerState::Failed);
                error!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

fn run(mut ctx: RunnerCtx) {
    ctx.status.set_state(WorkerState::Starting);
    debug!(worker = %ctx.name, "starting");

    if let Err(err) = ctx.worker.setup() {
        fail(&mut ctx, &err.to_string());
        ctx.barrier.defect(&ctx.name);
        ctx.worker.shutdown();
        return;
    }

    ctx.status.set_state(WorkerState::Ready);
    ctx.barrier.arrive(&ctx.name);
    debug!(worker = %ctx.name, "ready");

    if ctx.gate.wait() == StartOrder::Abort {
        ctx.worker.shutdown();
        ctx.status.set_state(WorkerState::Stopped);
        debug!(worker = %ctx.name, "aborted before running");
        return;
    }

    ctx.status.set_state(WorkerState::Running);
    info!(worker = %ctx.name, "running");

    run_loop(&mut ctx);

    if ctx.status.state() != WorkerState::Failed {
        ctx.status.set_state(WorkerState::Stopping);
        let discarded = ctx.mailbox.drain();
        if discarded > 0 {
            debug!(worker = %ctx.name, discarded, "discarded queued messages on stop");
        }
        ctx.worker.shutdown();
        ctx.status.set_state(WorkerState::Stopped);
        info!(worker = %ctx.name, "stopped");
    } else {
        ctx.worker.shutdown();
    }
}

fn run_loop(ctx: &mut RunnerCtx) {
    loop {
        if ctx.shutdown.is_stop_requested() {
            return;
        }

        // Inbound message, if this worker has upstream edges.
        let mut received = false;
        if ctx.has_upstream {
            match ctx.mailbox.recv_timeout(POLL_INTERVAL) {
                Ok(Message::Control(Signal::EndOfStream)) => {
                    if ctx.worker.wants_control() {
                        // Relay endpoints send the signal on before the
                        // stream winds down; a failing relay cannot keep
                        // the stream open.
                        if let Err(err) = ctx
                            .worker
                            .process(Message::Control(Signal::EndOfStream), &ctx.outbox)
                        {
                            warn!(worker = %ctx.name, "end-of-stream relay failed: {err}");
                        }
                    }
                    on_end_of_stream(ctx);
                    return;
                }
                Ok(Message::Control(Signal::Error { worker, message })) => {
                    warn!(
                        worker = %ctx.name,
                        failed = %worker,
                        "upstream worker failed: {message}"
                    );
                    let signal = Message::Control(Signal::Error { worker, message });
                    if ctx.worker.wants_control() {
                        match ctx.worker.process(signal.clone(), &ctx.outbox) {
                            Ok(()) => {}
                            Err(WorkerError::Recoverable(msg)) => {
                                warn!(worker = %ctx.name, "error relay failed: {msg}");
                            }
                            Err(WorkerError::Disconnected) => return,
                            Err(WorkerError::Fatal(msg)) => {
                                fail(ctx, &msg);
                                return;
                            }
                        }
                    }
                    // Let dependents further down fail fast or degrade too.
                    let _ = ctx.outbox.deliver(signal);
                    received = true;
                }
                Ok(message) => {
                    received = true;
                    match ctx.worker.process(message, &ctx.outbox) {
                        Ok(()) => {}
                        Err(WorkerError::Recoverable(msg)) => {
                            warn!(worker = %ctx.name, "dropped message: {msg}");
                        }
                        Err(WorkerError::Disconnected) => return,
                        Err(WorkerError::Fatal(msg)) => {
                            fail(ctx, &msg);
                            return;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        // Producer / poll work.
        match ctx.worker.tick(&ctx.outbox) {
            Ok(Tick::Idle) => {
                if !ctx.has_upstream && !received {
                    thread::sleep(POLL_INTERVAL);
                }
            }
            Ok(Tick::Progress) => {}
            Ok(Tick::Done) => {
                debug!(worker = %ctx.name, "source exhausted, emitting end of stream");
                on_end_of_stream(ctx);
                return;
            }
            Err(WorkerError::Recoverable(msg)) => {
                warn!(worker = %ctx.name, "tick error: {msg}");
            }
            Err(WorkerError::Disconnected) => return,
            Err(WorkerError::Fatal(msg)) => {
                fail(ctx, &msg);
                return;
            }
        }
    }
}

/// EndOfStream handling: forward along every edge; at a sink, the stream
/// is over for the whole graph, so request the global stop.
fn on_end_of_stream(ctx: &mut RunnerCtx) {
    if ctx.outbox.is_sink() {
        info!(worker = %ctx.name, "end of stream reached sink, requesting stop");
        ctx.shutdown.request_stop();
    } else {
        let _ = ctx.outbox.deliver(Message::Control(Signal::EndOfStream));
    }
}

/// Unrecoverable failure: log, mark Failed, tell downstream.
fn fail(ctx: &mut RunnerCtx, message: &str) {
    error!(worker = %ctx.name, "worker failed: {message}");
    ctx.status.set_error(message);
    ctx.status.set_state(WorkerState::Failed);
    let _ = ctx.outbox.deliver(Message::Control(Signal::Error {
        worker: ctx.name.clone(),
        message: message.to_string(),
    }));
}
