//! The worker abstraction and the kind registry.
//!
//! A [`Worker`] is one processing unit in the graph. Filters and sinks
//! implement [`Worker::process`]; producers implement [`Worker::tick`].
//! Workers are instantiated through a [`WorkerRegistry`] mapping a
//! configuration `kind` to a builder closure.

use crate::config::ResolvedParams;
use crate::error::{Result, VoxflowError};
use crate::message::Message;
use crate::runtime::router::{Disconnected, Outbox};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

/// Errors surfaced by worker logic.
#[derive(Debug, Clone)]
pub enum WorkerError {
    /// The current message is lost but the worker keeps running.
    Recoverable(String),
    /// The worker cannot continue; it transitions to `Failed`.
    Fatal(String),
    /// A downstream mailbox is gone; the worker stops gracefully.
    Disconnected,
}

impl WorkerError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        WorkerError::Recoverable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        WorkerError::Fatal(message.into())
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Recoverable(msg) => write!(f, "recoverable error: {msg}"),
            WorkerError::Fatal(msg) => write!(f, "fatal error: {msg}"),
            WorkerError::Disconnected => write!(f, "downstream disconnected"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<Disconnected> for WorkerError {
    fn from(_: Disconnected) -> Self {
        WorkerError::Disconnected
    }
}

impl From<VoxflowError> for WorkerError {
    fn from(err: VoxflowError) -> Self {
        WorkerError::Fatal(err.to_string())
    }
}

/// Outcome of one producer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing to do right now; the runner may idle briefly.
    Idle,
    /// Work was done; tick again without delay.
    Progress,
    /// The producer is exhausted; end-of-stream follows.
    Done,
}

/// A processing unit in the worker graph.
///
/// The runtime calls `setup` once before the readiness barrier, then
/// `process` for every inbound message and `tick` whenever the mailbox is
/// quiet (producers do all their work in `tick`). `shutdown` runs exactly
/// once when the worker stops, whatever the reason.
pub trait Worker: Send {
    /// One-time setup (model handles, sockets, files). Runs before the
    /// instance signals readiness.
    fn setup(&mut self) -> std::result::Result<(), WorkerError> {
        Ok(())
    }

    /// Handles one inbound message.
    ///
    /// EndOfStream and upstream Error signals are intercepted by the
    /// runtime and never reach this method unless the worker opts in via
    /// [`Worker::wants_control`].
    fn process(
        &mut self,
        message: Message,
        out: &Outbox,
    ) -> std::result::Result<(), WorkerError>;

    /// Whether EndOfStream and Error signals should be passed to
    /// `process` before the runtime acts on them. Workers that relay
    /// messages across a boundary (the transport endpoints) return true so
    /// the signals reach the other side; the runtime's own handling
    /// (forwarding, sink shutdown) still happens afterwards.
    fn wants_control(&self) -> bool {
        false
    }

    /// Produces output when no input is pending. Default: idle.
    fn tick(&mut self, _out: &Outbox) -> std::result::Result<Tick, WorkerError> {
        Ok(Tick::Idle)
    }

    /// Cleanup on shutdown.
    fn shutdown(&mut self) {}
}

impl fmt::Debug for dyn Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Worker")
    }
}

/// Lifecycle states of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Created = 0,
    Starting = 1,
    Ready = 2,
    Running = 3,
    Stopping = 4,
    Stopped = 5,
    Failed = 6,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Created,
            1 => WorkerState::Starting,
            2 => WorkerState::Ready,
            3 => WorkerState::Running,
            4 => WorkerState::Stopping,
            5 => WorkerState::Stopped,
            _ => WorkerState::Failed,
        }
    }

    /// Terminal states are never left.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

/// Shared status of one worker instance: lifecycle state plus the last
/// error message, readable by the supervisor while the worker runs.
#[derive(Clone, Debug)]
pub struct InstanceStatus {
    state: Arc<AtomicU8>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl InstanceStatus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(WorkerState::Created as u8)),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let mut guard = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(message.into());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a builder needs to construct a worker instance.
pub struct BuildCtx<'a> {
    /// Instance name from the configuration.
    pub name: &'a str,
    /// Registered kind.
    pub kind: &'a str,
    /// Merged local/global parameters.
    pub params: ResolvedParams<'a>,
}

type Builder = Box<dyn Fn(&BuildCtx) -> Result<Box<dyn Worker>> + Send + Sync>;

/// Registry of worker kinds.
///
/// Mirrors the configuration `kind` field to a builder; library users can
/// register their own kinds next to the built-in set.
pub struct WorkerRegistry {
    builders: HashMap<String, Builder>,
}

impl WorkerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// The registry with all built-in worker kinds.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::workers::register_builtin(&mut registry);
        crate::gate::register(&mut registry);
        crate::context::register(&mut registry);
        crate::transport::register(&mut registry);
        registry
    }

    /// Registers (or replaces) a kind.
    pub fn register<F>(&mut self, kind: &str, builder: F)
    where
        F: Fn(&BuildCtx) -> Result<Box<dyn Worker>> + Send + Sync + 'static,
    {
        self.builders.insert(kind.to_string(), Box::new(builder));
    }

    /// Builds a worker instance for one graph node.
    pub fn build(&self, ctx: &BuildCtx) -> Result<Box<dyn Worker>> {
        match self.builders.get(ctx.kind) {
            Some(builder) => builder(ctx),
            None => Err(VoxflowError::UnknownWorkerKind {
                kind: ctx.kind.to_string(),
            }),
        }
    }

    /// Registered kind names, for diagnostics.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.builders.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamMap;

    struct NopWorker;

    impl Worker for NopWorker {
        fn process(
            &mut self,
            _message: Message,
            _out: &Outbox,
        ) -> std::result::Result<(), WorkerError> {
            Ok(())
        }
    }

    #[test]
    fn registry_builds_registered_kind() {
        let mut registry = WorkerRegistry::new();
        registry.register("nop", |_ctx| Ok(Box::new(NopWorker)));

        let local = ParamMap::new();
        let global = ParamMap::new();
        let ctx = BuildCtx {
            name: "nop",
            kind: "nop",
            params: ResolvedParams::new("nop", &local, &global),
        };
        assert!(registry.build(&ctx).is_ok());
    }

    #[test]
    fn registry_rejects_unknown_kind() {
        let registry = WorkerRegistry::new();
        let local = ParamMap::new();
        let global = ParamMap::new();
        let ctx = BuildCtx {
            name: "mystery",
            kind: "mystery",
            params: ResolvedParams::new("mystery", &local, &global),
        };
        let err = registry.build(&ctx).unwrap_err();
        assert!(matches!(err, VoxflowError::UnknownWorkerKind { .. }));
    }

    #[test]
    fn builtin_registry_covers_original_worker_set() {
        let registry = WorkerRegistry::builtin();
        for kind in [
            "file_stream",
            "vad",
            "asr",
            "print",
            "transcript_file",
            "recording",
            "socket_server",
            "socket_client",
        ] {
            assert!(registry.kinds().contains(&kind), "missing kind {kind}");
        }
    }

    #[test]
    fn state_transitions_and_terminal_check() {
        let status = InstanceStatus::new();
        assert_eq!(status.state(), WorkerState::Created);
        status.set_state(WorkerState::Running);
        assert_eq!(status.state(), WorkerState::Running);
        assert!(!status.state().is_terminal());
        status.set_state(WorkerState::Failed);
        assert!(status.state().is_terminal());
    }

    #[test]
    fn instance_status_records_error() {
        let status = InstanceStatus::new();
        assert!(status.last_error().is_none());
        status.set_error("scorer died");
        assert_eq!(status.last_error().as_deref(), Some("scorer died"));
    }

    #[test]
    fn worker_error_display() {
        assert_eq!(
            WorkerError::recoverable("bad chunk").to_string(),
            "recoverable error: bad chunk"
        );
        assert_eq!(
            WorkerError::fatal("socket lost").to_string(),
            "fatal error: socket lost"
        );
    }
}
