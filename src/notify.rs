//! Operator-facing notifications.
//!
//! These are the short leveled messages an operator console shows
//! ("results for task X", "queue cleared"). They are separate from
//! diagnostic `tracing` output and fan out to every subscriber over a
//! broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Note,
    Success,
    Warn,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Level::Info => "[i]",
            Level::Note => "[-]",
            Level::Success => "[+]",
            Level::Warn => "[!]",
            Level::Error => "[X]",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub level: Level,
    pub time: DateTime<Utc>,
    pub message: String,
}

impl UserMessage {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            time: Utc::now(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for UserMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.level, self.message)
    }
}

/// Broadcast hub for [`UserMessage`]s.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<UserMessage>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UserMessage> {
        self.tx.subscribe()
    }

    /// Send to every current subscriber. Nobody listening is fine.
    pub fn send(&self, level: Level, message: impl Into<String>) {
        let _ = self.tx.send(UserMessage::new(level, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(Level::Info, message);
    }

    pub fn note(&self, message: impl Into<String>) {
        self.send(Level::Note, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send(Level::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.send(Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(Level::Error, message);
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_in_order() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.info("first");
        notifier.warn("second");

        let a = rx.try_recv().unwrap();
        let b = rx.try_recv().unwrap();
        assert_eq!((a.level, a.message.as_str()), (Level::Info, "first"));
        assert_eq!((b.level, b.message.as_str()), (Level::Warn, "second"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_without_subscribers_is_silent() {
        Notifier::new().error("nobody hears this");
    }
}
