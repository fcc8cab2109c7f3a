//! Worker directory.
//!
//! The dispatch core never owns workers. It sees them through
//! [`WorkerDirectory`]: lookup by ID, a narrow profile, checkin stamping,
//! info updates and a per-worker log sink. [`Fleet`] is the in-memory
//! implementation used by the operator binary and the tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{SysInfo, WorkerId, WorkerInfo};

/// What the dispatch core is allowed to read about a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerProfile {
    pub id: WorkerId,
    pub last_checkin: Option<DateTime<Utc>>,
    /// Maximum padding length for messages sent to this worker.
    pub padding_max: usize,
    pub max_retry: u32,
}

pub trait WorkerDirectory: Send + Sync {
    /// Profile of a known worker, `None` if the ID is unknown.
    fn profile(&self, id: WorkerId) -> Option<WorkerProfile>;

    /// Snapshot of every known worker ID. The directory is only locked
    /// for the duration of this call.
    fn worker_ids(&self) -> Vec<WorkerId>;

    fn record_checkin(&self, id: WorkerId, at: DateTime<Utc>);

    fn update_info(&self, id: WorkerId, info: WorkerInfo);

    /// Append a line to the worker's log.
    fn log(&self, id: WorkerId, message: &str);
}

/// Resolve a worker or fail with [`Error::UnknownWorker`].
pub fn resolve<D: WorkerDirectory + ?Sized>(directory: &D, id: WorkerId) -> Result<WorkerProfile> {
    directory.profile(id).ok_or(Error::UnknownWorker(id))
}

// ---------------------------------------------------------------------------
// Fleet
// ---------------------------------------------------------------------------

/// Reachability of a worker, judged from its checkin cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Active,
    Delayed,
    Dead,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Active => "Active",
            WorkerStatus::Delayed => "Delayed",
            WorkerStatus::Dead => "Dead",
        };
        f.write_str(s)
    }
}

/// Journal lines kept per worker; older lines are dropped first.
pub const JOURNAL_CAPACITY: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    pub time: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug)]
struct Worker {
    info: WorkerInfo,
    registered_at: DateTime<Utc>,
    last_checkin: Option<DateTime<Utc>>,
    journal: VecDeque<JournalEntry>,
}

impl Worker {
    fn record(&mut self, message: String) {
        if self.journal.len() == JOURNAL_CAPACITY {
            self.journal.pop_front();
        }
        self.journal.push_back(JournalEntry {
            time: Utc::now(),
            message,
        });
    }
}

/// In-memory worker directory.
#[derive(Debug, Default)]
pub struct Fleet {
    workers: RwLock<HashMap<WorkerId, Worker>>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker, replacing any previous entry with the same ID.
    pub fn register(&self, id: WorkerId, info: WorkerInfo) {
        let now = Utc::now();
        self.workers.write().insert(
            id,
            Worker {
                info,
                registered_at: now,
                last_checkin: None,
                journal: VecDeque::new(),
            },
        );
        info!(worker_id = %id, "worker registered");
    }

    pub fn remove(&self, id: WorkerId) -> Result<()> {
        self.workers
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::UnknownWorker(id))
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    pub fn info(&self, id: WorkerId) -> Option<WorkerInfo> {
        self.workers.read().get(&id).map(|w| w.info.clone())
    }

    /// The most recent journal lines for a worker, oldest first.
    pub fn journal(&self, id: WorkerId) -> Vec<JournalEntry> {
        self.workers
            .read()
            .get(&id)
            .map(|w| w.journal.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Active while the next checkin is still due, delayed while within
    /// the retry allowance, dead after that. A worker that never checked
    /// in is measured from registration. A deadline beyond the range of
    /// representable times is never reached.
    pub fn status(&self, id: WorkerId, now: DateTime<Utc>) -> Result<WorkerStatus> {
        let workers = self.workers.read();
        let worker = workers.get(&id).ok_or(Error::UnknownWorker(id))?;

        let wait = humantime::parse_duration(&worker.info.wait_time).map_err(|e| {
            Error::Other(format!(
                "worker {id} has an invalid wait time {:?}: {e}",
                worker.info.wait_time
            ))
        })?;
        let wait = chrono::Duration::from_std(wait)
            .map_err(|e| Error::Other(format!("wait time out of range: {e}")))?;

        let last = worker.last_checkin.unwrap_or(worker.registered_at);
        let next_due = last.checked_add_signed(wait);
        let give_up = i32::try_from(worker.info.max_retry)
            .ok()
            .and_then(|n| n.checked_add(1))
            .and_then(|n| wait.checked_mul(n))
            .and_then(|allowance| last.checked_add_signed(allowance));
        let pending = |deadline: Option<DateTime<Utc>>| deadline.is_none_or(|d| d > now);

        Ok(if pending(next_due) {
            WorkerStatus::Active
        } else if pending(give_up) {
            WorkerStatus::Delayed
        } else {
            WorkerStatus::Dead
        })
    }

    /// Load a fleet from a TOML seed file of `[[worker]]` tables.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read fleet file {}: {e}", path.display()))
        })?;
        let seed: FleetFile = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad fleet file {}: {e}", path.display())))?;

        let fleet = Self::new();
        for worker in seed.worker {
            let (id, info) = worker.into_info();
            fleet.register(id, info);
        }
        Ok(fleet)
    }
}

impl WorkerDirectory for Fleet {
    fn profile(&self, id: WorkerId) -> Option<WorkerProfile> {
        self.workers.read().get(&id).map(|w| WorkerProfile {
            id,
            last_checkin: w.last_checkin,
            padding_max: w.info.padding_max,
            max_retry: w.info.max_retry,
        })
    }

    fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<_> = self.workers.read().keys().copied().collect();
        ids.sort();
        ids
    }

    fn record_checkin(&self, id: WorkerId, at: DateTime<Utc>) {
        if let Some(worker) = self.workers.write().get_mut(&id) {
            worker.last_checkin = Some(at);
        }
    }

    fn update_info(&self, id: WorkerId, info: WorkerInfo) {
        let mut workers = self.workers.write();
        if let Some(worker) = workers.get_mut(&id) {
            worker.info = info;
            worker.record("worker info updated".to_string());
            info!(worker_id = %id, "worker info updated");
        }
    }

    fn log(&self, id: WorkerId, message: &str) {
        if let Some(worker) = self.workers.write().get_mut(&id) {
            worker.record(message.to_string());
        }
        info!(worker_id = %id, "{message}");
    }
}

// ---------------------------------------------------------------------------
// Seed file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FleetFile {
    #[serde(default)]
    worker: Vec<WorkerSeed>,
}

#[derive(Debug, Deserialize)]
struct WorkerSeed {
    id: WorkerId,
    #[serde(default)]
    host_name: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    architecture: String,
    #[serde(default = "default_wait_time")]
    wait_time: String,
    #[serde(default)]
    padding_max: usize,
    #[serde(default = "default_max_retry")]
    max_retry: u32,
}

fn default_wait_time() -> String {
    "30s".to_string()
}

fn default_max_retry() -> u32 {
    7
}

impl WorkerSeed {
    fn into_info(self) -> (WorkerId, WorkerInfo) {
        let info = WorkerInfo {
            wait_time: self.wait_time,
            padding_max: self.padding_max,
            max_retry: self.max_retry,
            sys_info: SysInfo {
                platform: self.platform,
                architecture: self.architecture,
                user_name: self.user_name,
                host_name: self.host_name,
                ..SysInfo::default()
            },
            ..WorkerInfo::default()
        };
        (self.id, info)
    }
}

/// Wait-time parsing is shared with the catalog's `sleep` validation.
pub(crate) fn parse_wait_time(s: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker_info(wait: &str, max_retry: u32) -> WorkerInfo {
        WorkerInfo {
            wait_time: wait.to_string(),
            max_retry,
            ..WorkerInfo::default()
        }
    }

    #[test]
    fn status_follows_checkin_cadence() {
        let fleet = Fleet::new();
        let id = WorkerId::new();
        fleet.register(id, worker_info("10s", 2));

        let checkin = Utc::now();
        fleet.record_checkin(id, checkin);

        let at = |secs| checkin + chrono::Duration::seconds(secs);
        assert_eq!(fleet.status(id, at(5)).unwrap(), WorkerStatus::Active);
        assert_eq!(fleet.status(id, at(15)).unwrap(), WorkerStatus::Delayed);
        assert_eq!(fleet.status(id, at(31)).unwrap(), WorkerStatus::Dead);
    }

    #[test]
    fn status_survives_extreme_worker_settings() {
        let fleet = Fleet::new();
        let checkin = Utc::now();
        let at = |secs| checkin + chrono::Duration::seconds(secs);

        for max_retry in [i32::MAX as u32 - 1, i32::MAX as u32, u32::MAX] {
            let id = WorkerId::new();
            fleet.register(id, worker_info("10s", max_retry));
            fleet.record_checkin(id, checkin);
            assert_eq!(fleet.status(id, at(15)).unwrap(), WorkerStatus::Delayed);
            assert_eq!(fleet.status(id, at(86_400 * 365)).unwrap(), WorkerStatus::Delayed);
        }

        let id = WorkerId::new();
        fleet.register(id, worker_info("200000000years", 3));
        fleet.record_checkin(id, checkin);
        assert_eq!(fleet.status(id, at(86_400)).unwrap(), WorkerStatus::Active);

        let id = WorkerId::new();
        fleet.register(id, worker_info("100000000000years", 0));
        assert!(fleet.status(id, Utc::now()).is_err());
    }

    #[test]
    fn status_rejects_bad_wait_time() {
        let fleet = Fleet::new();
        let id = WorkerId::new();
        fleet.register(id, worker_info("soon", 1));
        assert!(fleet.status(id, Utc::now()).is_err());
    }

    #[test]
    fn unknown_worker_does_not_resolve() {
        let fleet = Fleet::new();
        let id = WorkerId::new();
        assert!(matches!(resolve(&fleet, id), Err(Error::UnknownWorker(got)) if got == id));
    }

    #[test]
    fn log_lines_land_in_journal() {
        let fleet = Fleet::new();
        let id = WorkerId::new();
        fleet.register(id, WorkerInfo::default());
        fleet.log(id, "hello");
        let journal = fleet.journal(id);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].message, "hello");
    }

    #[test]
    fn journal_keeps_only_recent_lines() {
        let fleet = Fleet::new();
        let id = WorkerId::new();
        fleet.register(id, WorkerInfo::default());
        for n in 0..JOURNAL_CAPACITY + 5 {
            fleet.log(id, &format!("line {n}"));
        }

        let journal = fleet.journal(id);
        assert_eq!(journal.len(), JOURNAL_CAPACITY);
        assert_eq!(journal[0].message, "line 5");
        assert_eq!(
            journal[JOURNAL_CAPACITY - 1].message,
            format!("line {}", JOURNAL_CAPACITY + 4)
        );
    }

    #[test]
    fn remove_unknown_worker_errors() {
        assert!(Fleet::new().remove(WorkerId::new()).is_err());
    }
}
