//! Error types for voxflow.

use thiserror::Error;

/// A single problem found while compiling a worker graph.
///
/// Graph compilation reports *all* problems it finds, not just the first,
/// so these are collected into [`VoxflowError::InvalidGraph`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    #[error("duplicate worker name '{name}'")]
    DuplicateName { name: String },

    #[error("worker '{worker}' forwards to undeclared worker '{target}'")]
    UnknownTarget { worker: String, target: String },

    #[error("worker '{worker}' forwards to itself")]
    SelfLoop { worker: String },

    #[error("cycle through workers: {}", .workers.join(" -> "))]
    Cycle { workers: Vec<String> },
}

#[derive(Error, Debug)]
pub enum VoxflowError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid value for '{key}' in worker '{worker}': {message}")]
    ConfigInvalidValue {
        worker: String,
        key: String,
        message: String,
    },

    #[error("Unknown worker kind '{kind}'")]
    UnknownWorkerKind { kind: String },

    // Graph compilation errors
    #[error("Invalid worker graph: {}", .issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    InvalidGraph { issues: Vec<GraphIssue> },

    // Runtime errors
    #[error("Workers not ready after {timeout_secs}s: {}", .pending.join(", "))]
    ReadinessTimeout {
        pending: Vec<String>,
        timeout_secs: u64,
    },

    #[error("Worker '{worker}' failed: {message}")]
    WorkerFailed { worker: String, message: String },

    // Transport errors
    #[error("Transport error: {message}")]
    Transport { message: String },

    // External capability errors (scoring, transcription)
    #[error("Capability error: {message}")]
    Capability { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxflowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn graph_issue_display() {
        let issue = GraphIssue::UnknownTarget {
            worker: "vad".to_string(),
            target: "asrr".to_string(),
        };
        assert_eq!(
            issue.to_string(),
            "worker 'vad' forwards to undeclared worker 'asrr'"
        );
    }

    #[test]
    fn cycle_issue_lists_participants() {
        let issue = GraphIssue::Cycle {
            workers: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(issue.to_string(), "cycle through workers: a -> b -> a");
    }

    #[test]
    fn invalid_graph_joins_all_issues() {
        let error = VoxflowError::InvalidGraph {
            issues: vec![
                GraphIssue::SelfLoop {
                    worker: "echo".to_string(),
                },
                GraphIssue::DuplicateName {
                    name: "print".to_string(),
                },
            ],
        };
        let text = error.to_string();
        assert!(text.contains("worker 'echo' forwards to itself"));
        assert!(text.contains("duplicate worker name 'print'"));
    }

    #[test]
    fn readiness_timeout_names_pending_workers() {
        let error = VoxflowError::ReadinessTimeout {
            pending: vec!["asr".to_string(), "vad".to_string()],
            timeout_secs: 120,
        };
        assert_eq!(error.to_string(), "Workers not ready after 120s: asr, vad");
    }

    #[test]
    fn worker_failed_display() {
        let error = VoxflowError::WorkerFailed {
            worker: "asr".to_string(),
            message: "model handle lost".to_string(),
        };
        assert_eq!(error.to_string(), "Worker 'asr' failed: model handle lost");
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: VoxflowError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VoxflowError>();
        assert_sync::<VoxflowError>();
    }
}
