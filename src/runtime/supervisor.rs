//! Pipeline supervisor: builds workers from a compiled graph, wires their
//! mailboxes, drives the readiness barrier, and watches the run.

use crate::defaults;
use crate::error::{Result, VoxflowError};
use crate::graph::WorkerGraph;
use crate::runtime::barrier::{BarrierWait, ReadyBarrier, StartGate};
use crate::runtime::router::{mailbox, MailboxSender, Outbox};
use crate::runtime::runner::{RunnerCtx, ShutdownHandle, WorkerRunner};
use crate::runtime::worker::{BuildCtx, InstanceStatus, WorkerRegistry, WorkerState};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

const SUPERVISOR_POLL: Duration = Duration::from_millis(100);

/// Knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// How long the supervisor waits for every worker to become ready.
    pub ready_timeout: Duration,
    /// Default Data capacity per mailbox; a worker's `mailbox_capacity`
    /// parameter overrides it.
    pub mailbox_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(defaults::READY_TIMEOUT_SECS),
            mailbox_capacity: defaults::MAILBOX_CAPACITY,
        }
    }
}

/// Builds and launches worker graphs.
pub struct Runtime {
    registry: WorkerRegistry,
    options: RuntimeOptions,
}

impl Runtime {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self::with_options(registry, RuntimeOptions::default())
    }

    pub fn with_options(registry: WorkerRegistry, options: RuntimeOptions) -> Self {
        Self { registry, options }
    }

    /// Starts every worker in the graph and waits for collective readiness.
    ///
    /// On success all workers are `Running` and the returned handle owns the
    /// run. Any setup failure or readiness timeout tears the whole pipeline
    /// down before this returns.
    pub fn start(&self, graph: &WorkerGraph) -> Result<RuntimeHandle> {
        if graph.is_empty() {
            return Err(VoxflowError::Other(
                "pipeline has no workers".to_string(),
            ));
        }

        // Instantiate everything before spawning anything: an unknown kind
        // or bad parameter must fail fast, with no threads to unwind.
        let mut workers = Vec::with_capacity(graph.len());
        for idx in 0..graph.len() {
            let spec = graph.spec(idx);
            let ctx = BuildCtx {
                name: &spec.name,
                kind: &spec.kind,
                params: graph.params(idx),
            };
            workers.push(self.registry.build(&ctx)?);
        }

        // One mailbox per worker, capacity overridable per instance.
        let mut senders: Vec<MailboxSender> = Vec::with_capacity(graph.len());
        let mut mailboxes = Vec::with_capacity(graph.len());
        for idx in 0..graph.len() {
            let capacity = graph
                .params(idx)
                .usize_or("mailbox_capacity", self.options.mailbox_capacity)?;
            let (tx, rx) = mailbox(capacity);
            senders.push(tx);
            mailboxes.push(rx);
        }

        let mut has_upstream = vec![false; graph.len()];
        for idx in 0..graph.len() {
            for &target in graph.downstream(idx) {
                has_upstream[target] = true;
            }
        }

        let roster: Vec<String> = graph.specs().iter().map(|s| s.name.clone()).collect();
        let barrier = Arc::new(ReadyBarrier::new(roster));
        let gate = Arc::new(StartGate::new());
        let shutdown = ShutdownHandle::new();

        let mut runners = Vec::with_capacity(graph.len());
        let mut mailboxes = mailboxes.into_iter();
        for (idx, worker) in workers.into_iter().enumerate() {
            let spec = graph.spec(idx);
            let targets = graph
                .downstream(idx)
                .iter()
                .map(|&j| (graph.spec(j).name.clone(), senders[j].clone()))
                .collect();
            let ctx = RunnerCtx {
                name: spec.name.clone(),
                worker,
                // Iterator and specs run in lockstep over the same indices.
                mailbox: mailboxes.next().ok_or_else(|| {
                    VoxflowError::Other("mailbox wiring out of sync".to_string())
                })?,
                has_upstream: has_upstream[idx],
                outbox: Outbox::new(targets),
                status: InstanceStatus::new(),
                barrier: barrier.clone(),
                gate: gate.clone(),
                shutdown: shutdown.clone(),
            };
            match WorkerRunner::spawn(ctx) {
                Ok(runner) => runners.push(runner),
                Err(err) => {
                    // Unwind whatever is already parked at the gate.
                    gate.abort();
                    shutdown.request_stop();
                    for runner in &mut runners {
                        runner.join();
                    }
                    return Err(err.into());
                }
            }
        }
        // Senders stay alive only inside outboxes now; a worker's mailbox
        // disconnects once all of its upstream runners are gone.
        drop(senders);

        let mut handle = RuntimeHandle { runners, shutdown };

        match barrier.wait_all(self.options.ready_timeout) {
            BarrierWait::Complete => {
                info!(workers = graph.len(), "all workers ready, starting pipeline");
                gate.open();
                Ok(handle)
            }
            BarrierWait::Defected { workers } => {
                gate.abort();
                handle.shutdown.request_stop();
                handle.join_all();
                let worker = workers.first().cloned().unwrap_or_default();
                let message = handle
                    .status_of(&worker)
                    .and_then(|s| s.last_error())
                    .unwrap_or_else(|| "setup failed".to_string());
                error!(worker = %worker, "pipeline startup aborted: {message}");
                Err(VoxflowError::WorkerFailed { worker, message })
            }
            BarrierWait::TimedOut { pending } => {
                gate.abort();
                handle.shutdown.request_stop();
                handle.join_all();
                error!(pending = ?pending, "pipeline startup timed out");
                Err(VoxflowError::ReadinessTimeout {
                    pending,
                    timeout_secs: self.options.ready_timeout.as_secs(),
                })
            }
        }
    }
}

/// Owns a running pipeline.
#[derive(Debug)]
pub struct RuntimeHandle {
    runners: Vec<WorkerRunner>,
    shutdown: ShutdownHandle,
}

impl RuntimeHandle {
    /// Clone of the stop flag, e.g. for a signal handler.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Asks every worker to wind down gracefully.
    pub fn request_stop(&self) {
        self.shutdown.request_stop();
    }

    /// Current lifecycle states, for diagnostics.
    pub fn states(&self) -> Vec<(String, WorkerState)> {
        self.runners
            .iter()
            .map(|r| (r.name().to_string(), r.status().state()))
            .collect()
    }

    fn status_of(&self, name: &str) -> Option<&InstanceStatus> {
        self.runners
            .iter()
            .find(|r| r.name() == name)
            .map(|r| r.status())
    }

    fn join_all(&mut self) {
        for runner in &mut self.runners {
            runner.join();
        }
    }

    /// Blocks until the pipeline finishes.
    ///
    /// A worker entering `Failed` triggers a graceful stop of the rest and
    /// makes the run fail; otherwise the run ends when every worker reaches
    /// a terminal state (normally after end-of-stream hits a sink or a stop
    /// is requested).
    pub fn wait(mut self) -> Result<()> {
        loop {
            let mut all_terminal = true;
            let mut failed = None;
            for runner in &self.runners {
                let state = runner.status().state();
                if !state.is_terminal() {
                    all_terminal = false;
                }
                if state == WorkerState::Failed && failed.is_none() {
                    failed = Some(runner.name().to_string());
                }
            }
            if let Some(_name) = &failed {
                self.shutdown.request_stop();
            }
            if all_terminal {
                break;
            }
            thread::sleep(SUPERVISOR_POLL);
        }
        self.join_all();

        // Report the first failure found, if any (join may surface panics).
        for runner in &self.runners {
            if runner.status().state() == WorkerState::Failed {
                let message = runner
                    .status()
                    .last_error()
                    .unwrap_or_else(|| "unknown error".to_string());
                return Err(VoxflowError::WorkerFailed {
                    worker: runner.name().to_string(),
                    message,
                });
            }
        }
        info!("pipeline stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ParamMap, PipelineConfig};
    use crate::message::{AudioChunk, Message};
    use crate::runtime::router::Outbox;
    use crate::runtime::worker::{Tick, Worker, WorkerError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    fn graph(toml: &str) -> WorkerGraph {
        let config = PipelineConfig::parse(toml).expect("parse");
        WorkerGraph::compile(config.global, &config.workers).expect("compile")
    }

    struct Burst {
        count: u64,
        next: u64,
    }

    impl Worker for Burst {
        fn process(
            &mut self,
            _message: Message,
            _out: &Outbox,
        ) -> std::result::Result<(), WorkerError> {
            Ok(())
        }

        fn tick(&mut self, out: &Outbox) -> std::result::Result<Tick, WorkerError> {
            if self.next >= self.count {
                return Ok(Tick::Done);
            }
            let seq = self.next;
            self.next += 1;
            out.deliver(Message::audio(AudioChunk::new(vec![0; 4], seq)))?;
            Ok(Tick::Progress)
        }
    }

    struct Collect {
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl Worker for Collect {
        fn process(
            &mut self,
            message: Message,
            _out: &Outbox,
        ) -> std::result::Result<(), WorkerError> {
            if let Some(chunk) = message.as_audio() {
                self.seen
                    .lock()
                    .unwrap()
                    .push(chunk.sequence);
            }
            Ok(())
        }
    }

    struct SetupFails;

    impl Worker for SetupFails {
        fn setup(&mut self) -> std::result::Result<(), WorkerError> {
            Err(WorkerError::fatal("no model"))
        }

        fn process(
            &mut self,
            _message: Message,
            _out: &Outbox,
        ) -> std::result::Result<(), WorkerError> {
            Ok(())
        }
    }

    struct NeverReady;

    impl Worker for NeverReady {
        fn setup(&mut self) -> std::result::Result<(), WorkerError> {
            thread::sleep(Duration::from_secs(5));
            Ok(())
        }

        fn process(
            &mut self,
            _message: Message,
            _out: &Outbox,
        ) -> std::result::Result<(), WorkerError> {
            Ok(())
        }
    }

    #[test]
    fn runs_source_to_sink_and_stops_on_end_of_stream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();

        let mut registry = WorkerRegistry::new();
        registry.register("burst", |_| Ok(Box::new(Burst { count: 20, next: 0 })));
        registry.register("collect", move |_| {
            Ok(Box::new(Collect {
                seen: seen_in.clone(),
            }))
        });

        let graph = graph(
            r#"
            [[worker]]
            kind = "burst"
            to = "collect"
            [[worker]]
            kind = "collect"
            "#,
        );
        let runtime = Runtime::new(registry);
        let handle = runtime.start(&graph).expect("start");
        handle.wait().expect("run");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 20);
        // FIFO along the single edge.
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn setup_failure_aborts_startup() {
        let mut registry = WorkerRegistry::new();
        registry.register("bad", |_| Ok(Box::new(SetupFails)));
        registry.register("collect", |_| {
            Ok(Box::new(Collect {
                seen: Arc::new(Mutex::new(Vec::new())),
            }))
        });

        let graph = graph(
            r#"
            [[worker]]
            kind = "bad"
            to = "collect"
            [[worker]]
            kind = "collect"
            "#,
        );
        let err = Runtime::new(registry).start(&graph).unwrap_err();
        match err {
            VoxflowError::WorkerFailed { worker, message } => {
                assert_eq!(worker, "bad");
                assert!(message.contains("no model"), "message: {message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn readiness_timeout_names_the_laggard() {
        let mut registry = WorkerRegistry::new();
        registry.register("slow", |_| Ok(Box::new(NeverReady)));

        let graph = graph(
            r#"
            [[worker]]
            kind = "slow"
            "#,
        );
        let runtime = Runtime::with_options(
            registry,
            RuntimeOptions {
                ready_timeout: Duration::from_millis(100),
                mailbox_capacity: 8,
            },
        );
        let err = runtime.start(&graph).unwrap_err();
        assert!(matches!(
            err,
            VoxflowError::ReadinessTimeout { ref pending, .. } if pending == &["slow".to_string()]
        ));
    }

    #[test]
    fn unknown_kind_fails_before_spawning() {
        let registry = WorkerRegistry::new();
        let graph = graph(
            r#"
            [[worker]]
            kind = "mystery"
            "#,
        );
        let err = Runtime::new(registry).start(&graph).unwrap_err();
        assert!(matches!(err, VoxflowError::UnknownWorkerKind { .. }));
    }

    struct FailsMidRun {
        processed: Arc<AtomicU64>,
    }

    impl Worker for FailsMidRun {
        fn process(
            &mut self,
            _message: Message,
            _out: &Outbox,
        ) -> std::result::Result<(), WorkerError> {
            if self.processed.fetch_add(1, Ordering::SeqCst) >= 2 {
                return Err(WorkerError::fatal("scorer backend lost"));
            }
            Ok(())
        }
    }

    #[test]
    fn mid_run_failure_fails_the_wait() {
        let processed = Arc::new(AtomicU64::new(0));
        let processed_in = processed.clone();

        let mut registry = WorkerRegistry::new();
        registry.register("burst", |_| {
            Ok(Box::new(Burst {
                count: 1000,
                next: 0,
            }))
        });
        registry.register("flaky", move |_| {
            Ok(Box::new(FailsMidRun {
                processed: processed_in.clone(),
            }))
        });

        let graph = graph(
            r#"
            [[worker]]
            kind = "burst"
            to = "flaky"
            [[worker]]
            kind = "flaky"
            "#,
        );
        let handle = Runtime::new(registry).start(&graph).expect("start");
        let err = handle.wait().unwrap_err();
        assert!(matches!(
            err,
            VoxflowError::WorkerFailed { ref worker, .. } if worker == "flaky"
        ));
    }

    #[test]
    fn empty_graph_is_rejected() {
        let graph = WorkerGraph::compile(ParamMap::new(), &[]).expect("compile");
        let err = Runtime::new(WorkerRegistry::new()).start(&graph).unwrap_err();
        assert!(matches!(err, VoxflowError::Other(_)));
    }
}
