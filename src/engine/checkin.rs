//! Checkin handling: reconcile what a worker returned, then hand it its
//! pending tasks.
//!
//! Each returned task is validated and claimed in the ledger before any
//! side effect runs, so two copies of one result never both apply. A failed validation aborts the whole exchange, except for
//! bare result reports: those are logged and skipped so a worker with a
//! late or duplicate report can still pick up new work.

use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{Instrument, Span, error, info, warn};

use crate::config::DEFAULT_MAX_PADDING;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::transfer::FileStore;
use crate::envelope::{Envelope, EnvelopeKind, Message};
use crate::error::{Error, RejectReason, Result};
use crate::fleet::resolve;
use crate::model::{Payload, Status, Task, TaskKind, WorkerId};
use crate::telemetry::dispatch::{record_state_transition, start_checkin_span};
use crate::telemetry::metrics;

pub struct CheckinHandler {
    dispatcher: Arc<Dispatcher>,
    files: FileStore,
    max_padding: usize,
}

impl CheckinHandler {
    pub fn new(dispatcher: Arc<Dispatcher>, files: FileStore) -> Self {
        Self {
            dispatcher,
            files,
            max_padding: DEFAULT_MAX_PADDING,
        }
    }

    /// Cap reply padding at `max_padding` characters regardless of the
    /// worker's own setting.
    pub fn with_max_padding(mut self, max_padding: usize) -> Self {
        self.max_padding = max_padding;
        self
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Process a `results` envelope and build the reply.
    pub async fn handle(&self, envelope: Envelope) -> Result<Envelope> {
        let span = start_checkin_span(&envelope.worker_id, envelope.kind());
        self.exchange(envelope, &span)
            .instrument(span.clone())
            .await
    }

    /// A checkin with nothing to report. Replies with whatever is pending.
    pub async fn idle(&self, worker_id: WorkerId) -> Result<Envelope> {
        let span = start_checkin_span(&worker_id, EnvelopeKind::Idle);
        async {
            self.check_in(worker_id, EnvelopeKind::Idle)?;
            self.reply(&span, worker_id)
        }
        .instrument(span.clone())
        .await
    }

    async fn exchange(&self, envelope: Envelope, span: &Span) -> Result<Envelope> {
        let worker_id = envelope.worker_id;
        let returned = match envelope.message {
            Message::Results(tasks) => tasks,
            other => {
                warn!(worker_id = %worker_id, kind = %other.kind(), "unexpected envelope kind");
                return Err(Error::WrongEnvelopeKind(other.kind()));
            }
        };

        self.check_in(worker_id, EnvelopeKind::Results)?;
        for task in returned {
            self.reconcile(span, task).await?;
        }
        self.reply(span, worker_id)
    }

    fn check_in(&self, worker_id: WorkerId, kind: EnvelopeKind) -> Result<()> {
        let directory = self.dispatcher.directory();
        resolve(directory.as_ref(), worker_id)?;
        directory.record_checkin(worker_id, Utc::now());
        metrics::checkins().add(1, &[KeyValue::new("envelope", kind.to_string())]);
        Ok(())
    }

    async fn reconcile(&self, span: &Span, task: Task) -> Result<()> {
        let directory = self.dispatcher.directory();
        let notifier = self.dispatcher.notifier();

        if directory.profile(task.worker_id).is_none() {
            warn!(worker_id = %task.worker_id, task_id = %task.id, "returned task names an unknown worker");
            notifier.warn(format!(
                "Task {} was for an invalid worker {}",
                task.id, task.worker_id
            ));
            return Ok(());
        }

        match self.dispatcher.claim_result(&task) {
            Ok(claim) => {
                // a failed effect drops the claim and hands the row back
                self.apply(&task).await?;
                let from = claim.complete()?;
                record_state_transition(span, &task.id, from, Status::Complete);
                Ok(())
            }
            Err(reason) => {
                metrics::results_rejected().add(1, &[KeyValue::new("reason", reason.as_str())]);
                if task.kind() != TaskKind::Results {
                    error!(
                        worker_id = %task.worker_id,
                        task_id = %task.id,
                        kind = %task.kind(),
                        reason = %reason,
                        "rejected returned task"
                    );
                    return Err(Error::StaleResult {
                        task_id: task.id.clone(),
                        reason,
                    });
                }

                warn!(
                    worker_id = %task.worker_id,
                    task_id = %task.id,
                    reason = %reason,
                    "ignoring result report"
                );
                // Output for a task this server never issued (or has
                // forgotten) is still shown; replays and forgeries are not.
                if reason == RejectReason::UnknownTask {
                    self.apply(&task).await?;
                }
                Ok(())
            }
        }
    }

    /// Kind-specific side effects of a returned task.
    async fn apply(&self, task: &Task) -> Result<()> {
        let directory = self.dispatcher.directory();
        let notifier = self.dispatcher.notifier();

        match &task.payload {
            Payload::Results(results) => {
                let header = format!("Results for task {} from worker {}", task.id, task.worker_id);
                directory.log(task.worker_id, &header);
                notifier.note(header);
                if !results.stdout.is_empty() {
                    directory.log(task.worker_id, &format!("Command Results (stdout):\r\n{}", results.stdout));
                    notifier.success(results.stdout.clone());
                }
                if !results.stderr.is_empty() {
                    directory.log(task.worker_id, &format!("Command Results (stderr):\r\n{}", results.stderr));
                    notifier.warn(results.stderr.clone());
                }
            }
            Payload::WorkerInfo(info) => {
                directory.update_info(task.worker_id, info.clone());
            }
            Payload::FileTransfer(transfer) => {
                self.files
                    .receive(directory.as_ref(), notifier, task.worker_id, transfer)
                    .await?;
            }
            _ => {
                info!(task_id = %task.id, kind = %task.kind(), "no server-side action for returned task");
            }
        }
        Ok(())
    }

    fn reply(&self, span: &Span, worker_id: WorkerId) -> Result<Envelope> {
        let profile = resolve(self.dispatcher.directory().as_ref(), worker_id)?;
        let tasks = self.dispatcher.get(worker_id)?;
        span.record("checkin.tasks", tasks.len());
        let padding = profile.padding_max.min(self.max_padding);
        Ok(Envelope::reply(worker_id, tasks, padding))
    }
}
