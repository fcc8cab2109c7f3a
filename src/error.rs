//! Error types for jobq.

use std::path::PathBuf;

use thiserror::Error;

use crate::envelope::EnvelopeKind;
use crate::model::{Status, TaskId, WorkerId};

/// Why a returned result was refused by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No ledger entry for the task ID.
    UnknownTask,
    /// The presented token does not match the issued one.
    TokenMismatch,
    /// The task was issued to a different worker.
    WorkerMismatch,
    /// The task was never delivered to the worker.
    NotDelivered,
    /// Another copy of the same result is being applied.
    InFlight,
    AlreadyComplete,
    Canceled,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::UnknownTask => "unknown_task",
            RejectReason::TokenMismatch => "token_mismatch",
            RejectReason::WorkerMismatch => "worker_mismatch",
            RejectReason::NotDelivered => "not_delivered",
            RejectReason::InFlight => "in_flight",
            RejectReason::AlreadyComplete => "already_complete",
            RejectReason::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectReason::UnknownTask => "no such task",
            RejectReason::TokenMismatch => "token mismatch",
            RejectReason::WorkerMismatch => "task belongs to another worker",
            RejectReason::NotDelivered => "task was never delivered",
            RejectReason::InFlight => "result is already being processed",
            RejectReason::AlreadyComplete => "task already complete",
            RejectReason::Canceled => "task was canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} is not a valid worker")]
    UnknownWorker(WorkerId),

    #[error("there are 0 available workers, no tasks were created")]
    EmptyFleet,

    #[error("invalid arguments for {kind}: {reason}")]
    InvalidArguments { kind: String, reason: String },

    #[error("unknown task kind: {0}")]
    UnknownKind(String),

    #[error("queue for worker {worker_id} is full ({capacity} pending tasks)")]
    QueueFull { worker_id: WorkerId, capacity: usize },

    #[error("ledger has no entry for task {task_id} queued for worker {worker_id}")]
    LedgerInconsistency { task_id: TaskId, worker_id: WorkerId },

    #[error("rejected result for task {task_id}: {reason}")]
    StaleResult { task_id: TaskId, reason: RejectReason },

    #[error("invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: Status,
        to: Status,
    },

    #[error("invalid envelope kind for the result handler: {0}")]
    WrongEnvelopeKind(EnvelopeKind),

    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("storage root {} is unavailable", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn invalid_args(kind: &str, reason: impl Into<String>) -> Self {
        Error::InvalidArguments {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
