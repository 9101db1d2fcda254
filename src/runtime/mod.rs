//! Worker runtime: mailboxes, lifecycle, readiness barrier, supervision.

pub mod barrier;
pub mod router;
pub mod runner;
pub mod supervisor;
pub mod worker;

pub use barrier::{BarrierWait, ReadyBarrier, StartGate, StartOrder};
pub use router::{mailbox, Disconnected, Mailbox, MailboxSender, Outbox};
pub use runner::{ShutdownHandle, WorkerRunner};
pub use supervisor::{Runtime, RuntimeHandle, RuntimeOptions};
pub use worker::{BuildCtx, InstanceStatus, Tick, Worker, WorkerError, WorkerRegistry, WorkerState};
