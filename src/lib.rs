//! voxflow - worker-graph pipeline runtime for conversational audio
//!
//! A pipeline is a validated directed graph of concurrent workers wired by
//! a declarative configuration: producers stream audio, a gate filters
//! silence, accumulators assemble transcription units, and sinks print,
//! persist or relay over TCP.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod cli;
pub mod config;
pub mod context;
pub mod defaults;
pub mod error;
pub mod gate;
pub mod graph;
pub mod message;
pub mod runtime;
pub mod transport;
pub mod workers;

// Core worker abstraction (produce → process → sink)
pub use runtime::{BuildCtx, Outbox, Tick, Worker, WorkerError, WorkerRegistry, WorkerState};

// Pipeline
pub use graph::{WorkerGraph, WorkerSpec};
pub use runtime::{Runtime, RuntimeHandle, RuntimeOptions, ShutdownHandle};

// Messages
pub use message::{AudioChunk, Message, Payload, Segment, Signal, Transcript};

// Error handling
pub use error::{GraphIssue, Result, VoxflowError};

// Config
pub use config::{ParamMap, ParamValue, PipelineConfig, ResolvedParams, WorkerDecl};

// Capability traits (for custom scorers and backends)
pub use context::{MockTranscriber, Transcriber, Transcription};
pub use gate::{EnergyScorer, FixedScorer, SpeechScorer};
