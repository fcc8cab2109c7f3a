//! The dispatcher. The public API for queueing, delivering and canceling
//! tasks.
//!
//! Owns the per-worker queues and the task ledger. All status transitions
//! go through here. When both are needed the queue lock is always taken
//! before the ledger lock.

use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, error, info, warn};

use crate::catalog;
use crate::engine::ledger::Ledger;
use crate::engine::queue::QueueStore;
use crate::error::{Error, RejectReason, Result};
use crate::fleet::{WorkerDirectory, resolve};
use crate::model::{ActiveTaskRow, Status, Task, TaskId, TaskMetadata, Token, WorkerId};
use crate::notify::Notifier;
use crate::telemetry::metrics;

pub struct Dispatcher {
    directory: Arc<dyn WorkerDirectory>,
    notifier: Notifier,
    queues: QueueStore,
    ledger: Ledger,
}

impl Dispatcher {
    pub fn new(directory: Arc<dyn WorkerDirectory>, notifier: Notifier, queue_capacity: usize) -> Self {
        Self {
            directory,
            notifier,
            queues: QueueStore::new(queue_capacity),
            ledger: Ledger::new(),
        }
    }

    pub fn directory(&self) -> &Arc<dyn WorkerDirectory> {
        &self.directory
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Queue a task of kind `kind` for `worker_id`, or for every known
    /// worker when `worker_id` is [`WorkerId::BROADCAST`].
    ///
    /// Arguments are validated before any queue is touched, so a failed
    /// Add leaves no trace. For a broadcast the ID of the last task
    /// created is returned.
    pub fn add<S: AsRef<str>>(&self, worker_id: WorkerId, kind: &str, args: &[S]) -> Result<TaskId> {
        let targets = if worker_id.is_broadcast() {
            let ids = self.directory.worker_ids();
            if ids.is_empty() {
                return Err(Error::EmptyFleet);
            }
            ids
        } else {
            resolve(self.directory.as_ref(), worker_id)?;
            vec![worker_id]
        };

        let shaped = catalog::shape(kind, args)?;
        let shown: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();

        let mut last = None;
        for target in targets {
            let id = self.enqueue(target, &shaped)?;
            for note in &shaped.notes {
                self.directory.log(target, note);
            }
            self.directory.log(
                target,
                &format!(
                    "Created task Type:{}, ID:{id}, Status:{}, Args:{shown:?}",
                    shaped.kind(),
                    Status::Created
                ),
            );
            self.notifier
                .info(format!("Created task {id} for worker {target}"));
            last = Some(id);
        }
        last.ok_or(Error::EmptyFleet)
    }

    fn enqueue(&self, worker_id: WorkerId, shaped: &catalog::Shaped) -> Result<TaskId> {
        let kind = shaped.kind();
        let queue = self.queues.get_or_create(worker_id);
        let mut pending = queue.lock();

        if pending.is_full() {
            metrics::tasks_enqueued().add(
                1,
                &[
                    KeyValue::new("kind", kind.to_string()),
                    KeyValue::new("result", "queue_full"),
                ],
            );
            return Err(Error::QueueFull {
                worker_id,
                capacity: pending.capacity(),
            });
        }

        let token = Token::new();
        let id = self.ledger.create(worker_id, kind, token, Utc::now());
        let task = Task {
            worker_id,
            id: id.clone(),
            token,
            payload: shaped.payload.clone(),
        };
        if pending.push(task).is_err() {
            // capacity was checked under the same lock
            return Err(Error::QueueFull {
                worker_id,
                capacity: pending.capacity(),
            });
        }

        metrics::tasks_enqueued().add(
            1,
            &[
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("result", "ok"),
            ],
        );
        info!(worker_id = %worker_id, task_id = %id, kind = %kind, "task queued");
        Ok(id)
    }

    /// Drain every pending task for `worker_id` and mark each one `Sent`.
    ///
    /// A worker with no queue yet simply has nothing pending.
    pub fn get(&self, worker_id: WorkerId) -> Result<Vec<Task>> {
        resolve(self.directory.as_ref(), worker_id)?;

        let Some(queue) = self.queues.get(worker_id) else {
            return Ok(Vec::new());
        };
        let mut pending = queue.lock();
        let tasks = pending.drain();

        let now = Utc::now();
        for task in &tasks {
            if self.ledger.transition(&task.id, Status::Sent, now)?.is_none() {
                error!(
                    worker_id = %worker_id,
                    task_id = %task.id,
                    "queued task has no ledger entry"
                );
                return Err(Error::LedgerInconsistency {
                    task_id: task.id.clone(),
                    worker_id,
                });
            }
        }
        if !tasks.is_empty() {
            debug!(worker_id = %worker_id, count = tasks.len(), "tasks delivered");
        }
        Ok(tasks)
    }

    /// Drop every pending task for `worker_id`, marking each `Canceled`.
    /// Returns how many were dropped.
    pub fn clear(&self, worker_id: WorkerId) -> Result<usize> {
        resolve(self.directory.as_ref(), worker_id)?;

        let Some(queue) = self.queues.get(worker_id) else {
            return Ok(0);
        };
        let mut pending = queue.lock();
        let tasks = pending.drain();

        let now = Utc::now();
        for task in &tasks {
            if self.ledger.transition(&task.id, Status::Canceled, now)?.is_none() {
                error!(
                    worker_id = %worker_id,
                    task_id = %task.id,
                    "queued task has no ledger entry"
                );
                return Err(Error::LedgerInconsistency {
                    task_id: task.id.clone(),
                    worker_id,
                });
            }
        }
        drop(pending);

        info!(worker_id = %worker_id, count = tasks.len(), "queue cleared");
        self.notifier
            .success(format!("Jobs cleared for worker {worker_id}"));
        Ok(tasks.len())
    }

    /// Non-terminal tasks for `worker_id`, oldest first.
    pub fn active_table(&self, worker_id: WorkerId) -> Result<Vec<ActiveTaskRow>> {
        resolve(self.directory.as_ref(), worker_id)?;
        Ok(self.ledger.active_for(worker_id))
    }

    /// Ledger row for a task, if it was ever issued.
    pub fn task(&self, task_id: &TaskId) -> Option<TaskMetadata> {
        self.ledger.get(task_id)
    }

    /// Number of tasks ever issued.
    pub fn task_count(&self) -> usize {
        self.ledger.len()
    }

    /// Tasks waiting for delivery to `worker_id`.
    pub fn pending(&self, worker_id: WorkerId) -> usize {
        self.queues.pending(worker_id)
    }

    /// Validate a returned task and hold its ledger row while the result
    /// is applied. Concurrent presenters of the same task are refused
    /// until the claim is completed or dropped.
    pub fn claim_result(&self, task: &Task) -> std::result::Result<ResultClaim<'_>, RejectReason> {
        let row = self.ledger.claim(task, Utc::now())?;
        Ok(ResultClaim {
            ledger: &self.ledger,
            task_id: task.id.clone(),
            from: row.status,
            completed: false,
        })
    }
}

/// A returned task whose ledger row is held while its side effects run.
///
/// Dropping the claim without calling [`ResultClaim::complete`] hands the
/// row back to `Sent`, so a failed effect can be retried.
pub struct ResultClaim<'a> {
    ledger: &'a Ledger,
    task_id: TaskId,
    from: Status,
    completed: bool,
}

impl ResultClaim<'_> {
    /// Mark the task `Complete`. Returns the status it had when claimed.
    pub fn complete(mut self) -> Result<Status> {
        self.ledger.finish(&self.task_id, Utc::now())?;
        self.completed = true;
        Ok(self.from)
    }
}

impl Drop for ResultClaim<'_> {
    fn drop(&mut self) {
        if !self.completed && self.ledger.release(&self.task_id) {
            warn!(task_id = %self.task_id, "result claim released");
        }
    }
}
