//! The logical message exchanged with a worker on every checkin.
//!
//! Wire encoding and encryption live outside this crate; this is the
//! decoded shape the handler works with.

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::model::{Task, WorkerId};

pub const PROTOCOL_VERSION: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Tasks,
    Idle,
    Results,
    Control,
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvelopeKind::Tasks => "tasks",
            EnvelopeKind::Idle => "idle",
            EnvelopeKind::Results => "results",
            EnvelopeKind::Control => "control",
        };
        f.write_str(s)
    }
}

/// Kind plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// Pending tasks for the worker, in queue order.
    Tasks(Vec<Task>),
    /// Nothing to do.
    Idle,
    /// Finished or partial tasks coming back from the worker.
    Results(Vec<Task>),
    /// Session-level traffic handled elsewhere.
    Control(serde_json::Value),
}

impl Message {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Message::Tasks(_) => EnvelopeKind::Tasks,
            Message::Idle => EnvelopeKind::Idle,
            Message::Results(_) => EnvelopeKind::Results,
            Message::Control(_) => EnvelopeKind::Control,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub worker_id: WorkerId,
    pub version: f32,
    pub message: Message,
    /// Random filler, only there to vary the message size.
    #[serde(default)]
    pub padding: String,
}

impl Envelope {
    pub fn new(worker_id: WorkerId, message: Message) -> Self {
        Self {
            worker_id,
            version: PROTOCOL_VERSION,
            message,
            padding: String::new(),
        }
    }

    /// Outbound reply: `tasks` when anything is pending, `idle` otherwise.
    pub fn reply(worker_id: WorkerId, tasks: Vec<Task>, padding_len: usize) -> Self {
        let message = if tasks.is_empty() {
            Message::Idle
        } else {
            Message::Tasks(tasks)
        };
        Self {
            worker_id,
            version: PROTOCOL_VERSION,
            message,
            padding: padding(padding_len),
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.message.kind()
    }
}

/// Random alphanumeric filler of exactly `len` characters.
pub fn padding(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reply_is_idle() {
        let env = Envelope::reply(WorkerId::new(), Vec::new(), 16);
        assert_eq!(env.kind(), EnvelopeKind::Idle);
        assert_eq!(env.padding.len(), 16);
        assert_eq!(env.version, PROTOCOL_VERSION);
    }

    #[test]
    fn zero_padding_is_empty() {
        assert!(padding(0).is_empty());
    }
}
