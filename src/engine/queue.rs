//! Per-worker bounded FIFO queues.
//!
//! One mutex per worker, so an Add for one worker never waits on a Get for
//! another. Queues are created on first enqueue and never removed; an
//! empty queue costs one map entry.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::model::{Task, WorkerId};

pub(crate) type WorkerQueue = Arc<Mutex<PendingTasks>>;

#[derive(Debug)]
pub(crate) struct PendingTasks {
    tasks: VecDeque<Task>,
    capacity: usize,
}

impl PendingTasks {
    fn new(capacity: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            capacity,
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.tasks.len() >= self.capacity
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Append unless full. A full queue hands the task back.
    pub(crate) fn push(&mut self, task: Task) -> Result<(), Task> {
        if self.is_full() {
            return Err(task);
        }
        self.tasks.push_back(task);
        Ok(())
    }

    /// Remove everything, oldest first.
    pub(crate) fn drain(&mut self) -> Vec<Task> {
        self.tasks.drain(..).collect()
    }
}

#[derive(Debug)]
pub(crate) struct QueueStore {
    queues: DashMap<WorkerId, WorkerQueue>,
    capacity: usize,
}

impl QueueStore {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queues: DashMap::new(),
            capacity,
        }
    }

    /// Queue handle for a worker, creating an empty queue on first use.
    ///
    /// The map shard lock is released before the handle is returned.
    pub(crate) fn get_or_create(&self, worker_id: WorkerId) -> WorkerQueue {
        self.queues
            .entry(worker_id)
            .or_insert_with(|| Arc::new(Mutex::new(PendingTasks::new(self.capacity))))
            .value()
            .clone()
    }

    /// Queue handle for a worker that already has one.
    pub(crate) fn get(&self, worker_id: WorkerId) -> Option<WorkerQueue> {
        self.queues.get(&worker_id).map(|q| Arc::clone(q.value()))
    }

    pub(crate) fn pending(&self, worker_id: WorkerId) -> usize {
        self.get(worker_id).map(|q| q.lock().len()).unwrap_or(0)
    }
}
