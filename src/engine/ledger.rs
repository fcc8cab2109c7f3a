//! Task ledger: one metadata row per issued task.
//!
//! Every status change goes through [`Ledger::transition`], which enforces
//! the state machine from [`Status::can_transition_to`] and stamps the
//! matching timestamp. The one exception is [`Ledger::release`], which
//! hands a claimed row back to `Sent` after a failed side effect. Rows are
//! never removed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::RwLock;

use crate::error::{Error, RejectReason, Result};
use crate::model::{ActiveTaskRow, Status, Task, TaskId, TaskKind, TaskMetadata, Token, WorkerId};
use crate::telemetry::metrics;

#[derive(Debug, Default)]
pub(crate) struct Ledger {
    rows: RwLock<HashMap<TaskId, TaskMetadata>>,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a `Created` row under a freshly generated, unused task ID.
    pub(crate) fn create(
        &self,
        worker_id: WorkerId,
        kind: TaskKind,
        token: Token,
        now: DateTime<Utc>,
    ) -> TaskId {
        let mut rows = self.rows.write();
        let mut id = TaskId::generate();
        while rows.contains_key(&id) {
            id = TaskId::generate();
        }
        rows.insert(
            id.clone(),
            TaskMetadata {
                worker_id,
                kind,
                token,
                status: Status::Created,
                chunk: 0,
                created_at: now,
                sent_at: None,
                completed_at: None,
            },
        );
        id
    }

    pub(crate) fn get(&self, id: &TaskId) -> Option<TaskMetadata> {
        self.rows.read().get(id).cloned()
    }

    /// Move a row to `to`. Returns the previous status, or `None` when
    /// there is no row for `id`.
    pub(crate) fn transition(
        &self,
        id: &TaskId,
        to: Status,
        now: DateTime<Utc>,
    ) -> Result<Option<Status>> {
        let mut rows = self.rows.write();
        match rows.get_mut(id) {
            Some(row) => advance(id, row, to, now).map(Some),
            None => Ok(None),
        }
    }

    /// Validate a returned task and claim its row in one critical section.
    ///
    /// A delivered row moves `Sent -> Returned` and the row as it was
    /// before the claim is returned. While the claim is held every other
    /// presenter of the same task is refused with
    /// [`RejectReason::InFlight`]. The claim ends with [`Ledger::finish`]
    /// or [`Ledger::release`].
    pub(crate) fn claim(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> std::result::Result<TaskMetadata, RejectReason> {
        let mut rows = self.rows.write();
        let row = rows.get_mut(&task.id).ok_or(RejectReason::UnknownTask)?;
        if row.token != task.token {
            return Err(RejectReason::TokenMismatch);
        }
        if row.worker_id != task.worker_id {
            return Err(RejectReason::WorkerMismatch);
        }
        match row.status {
            Status::Sent => {
                let before = row.clone();
                advance(&task.id, row, Status::Returned, now)
                    .map_err(|_| RejectReason::InFlight)?;
                Ok(before)
            }
            Status::Created => Err(RejectReason::NotDelivered),
            Status::Returned => Err(RejectReason::InFlight),
            Status::Complete => Err(RejectReason::AlreadyComplete),
            Status::Canceled => Err(RejectReason::Canceled),
        }
    }

    /// Complete a claimed row.
    pub(crate) fn finish(&self, id: &TaskId, now: DateTime<Utc>) -> Result<Option<Status>> {
        self.transition(id, Status::Complete, now)
    }

    /// Hand a claimed row back so the result can be presented again.
    /// Returns `false` when the row was not claimed.
    pub(crate) fn release(&self, id: &TaskId) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(id) {
            Some(row) if row.status == Status::Returned => {
                row.status = Status::Sent;
                true
            }
            _ => false,
        }
    }

    /// Non-terminal rows for one worker, oldest first.
    pub(crate) fn active_for(&self, worker_id: WorkerId) -> Vec<ActiveTaskRow> {
        let rows = self.rows.read();
        let mut active: Vec<ActiveTaskRow> = rows
            .iter()
            .filter(|(_, row)| row.worker_id == worker_id && !row.status.is_terminal())
            .map(|(id, row)| ActiveTaskRow {
                task_id: id.clone(),
                status: row.status,
                kind: row.kind,
                created_at: row.created_at,
                sent_at: row.sent_at,
            })
            .collect();
        active.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.as_str().cmp(b.task_id.as_str()))
        });
        active
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.read().len()
    }
}

fn advance(id: &TaskId, row: &mut TaskMetadata, to: Status, now: DateTime<Utc>) -> Result<Status> {
    let from = row.status;
    if !from.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            task_id: id.clone(),
            from,
            to,
        });
    }

    row.status = to;
    match to {
        Status::Sent => row.sent_at = Some(now),
        Status::Complete => row.completed_at = Some(now),
        _ => {}
    }

    metrics::task_transitions().add(
        1,
        &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
    Ok(from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, ResultsPayload};

    fn returned(worker_id: WorkerId, id: &TaskId, token: Token) -> Task {
        Task {
            worker_id,
            id: id.clone(),
            token,
            payload: Payload::Results(ResultsPayload::default()),
        }
    }

    #[test]
    fn create_starts_in_created() {
        let ledger = Ledger::new();
        let worker = WorkerId::new();
        let id = ledger.create(worker, TaskKind::Command, Token::new(), Utc::now());

        let row = ledger.get(&id).unwrap();
        assert_eq!(row.status, Status::Created);
        assert_eq!(row.worker_id, worker);
        assert!(row.sent_at.is_none());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn transitions_stamp_times() {
        let ledger = Ledger::new();
        let id = ledger.create(WorkerId::new(), TaskKind::Command, Token::new(), Utc::now());

        let now = Utc::now();
        assert_eq!(ledger.transition(&id, Status::Sent, now).unwrap(), Some(Status::Created));
        assert_eq!(ledger.get(&id).unwrap().sent_at, Some(now));

        assert_eq!(ledger.transition(&id, Status::Complete, now).unwrap(), Some(Status::Sent));
        assert_eq!(ledger.get(&id).unwrap().completed_at, Some(now));
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let ledger = Ledger::new();
        let id = ledger.create(WorkerId::new(), TaskKind::Command, Token::new(), Utc::now());

        let err = ledger.transition(&id, Status::Complete, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition { from: Status::Created, to: Status::Complete, .. }
        ));
        assert_eq!(ledger.get(&id).unwrap().status, Status::Created);

        ledger.transition(&id, Status::Canceled, Utc::now()).unwrap();
        assert!(ledger.transition(&id, Status::Sent, Utc::now()).is_err());
    }

    #[test]
    fn missing_row_is_none() {
        let ledger = Ledger::new();
        let id = TaskId::from("nosuchtask");
        assert_eq!(ledger.transition(&id, Status::Sent, Utc::now()).unwrap(), None);
    }

    #[test]
    fn claim_checks_token_worker_and_status() {
        let ledger = Ledger::new();
        let worker = WorkerId::new();
        let token = Token::new();
        let id = ledger.create(worker, TaskKind::Command, token, Utc::now());
        let now = Utc::now();

        assert_eq!(
            ledger.claim(&returned(worker, &id, token), now).unwrap_err(),
            RejectReason::NotDelivered
        );
        ledger.transition(&id, Status::Sent, now).unwrap();

        assert_eq!(
            ledger.claim(&returned(worker, &id, Token::new()), now).unwrap_err(),
            RejectReason::TokenMismatch
        );
        assert_eq!(
            ledger.claim(&returned(WorkerId::new(), &id, token), now).unwrap_err(),
            RejectReason::WorkerMismatch
        );
        assert_eq!(
            ledger
                .claim(&returned(worker, &TaskId::from("missing000"), token), now)
                .unwrap_err(),
            RejectReason::UnknownTask
        );
        assert_eq!(ledger.get(&id).unwrap().status, Status::Sent);

        let before = ledger.claim(&returned(worker, &id, token), now).unwrap();
        assert_eq!(before.status, Status::Sent);
        assert_eq!(ledger.get(&id).unwrap().status, Status::Returned);

        ledger.finish(&id, now).unwrap();
        assert_eq!(
            ledger.claim(&returned(worker, &id, token), now).unwrap_err(),
            RejectReason::AlreadyComplete
        );
    }

    #[test]
    fn claimed_row_refuses_a_second_presenter_until_released() {
        let ledger = Ledger::new();
        let worker = WorkerId::new();
        let token = Token::new();
        let id = ledger.create(worker, TaskKind::FileTransfer, token, Utc::now());
        let sent_at = Utc::now();
        ledger.transition(&id, Status::Sent, sent_at).unwrap();

        ledger.claim(&returned(worker, &id, token), Utc::now()).unwrap();
        assert_eq!(
            ledger.claim(&returned(worker, &id, token), Utc::now()).unwrap_err(),
            RejectReason::InFlight
        );

        assert!(ledger.release(&id));
        let row = ledger.get(&id).unwrap();
        assert_eq!(row.status, Status::Sent);
        assert_eq!(row.sent_at, Some(sent_at));
        assert!(!ledger.release(&id));

        ledger.claim(&returned(worker, &id, token), Utc::now()).unwrap();
        assert_eq!(ledger.finish(&id, Utc::now()).unwrap(), Some(Status::Returned));
    }

    #[test]
    fn active_rows_skip_terminal_and_other_workers() {
        let ledger = Ledger::new();
        let worker = WorkerId::new();
        let kept = ledger.create(worker, TaskKind::Command, Token::new(), Utc::now());
        let canceled = ledger.create(worker, TaskKind::Native, Token::new(), Utc::now());
        ledger.create(WorkerId::new(), TaskKind::Command, Token::new(), Utc::now());
        ledger.transition(&canceled, Status::Canceled, Utc::now()).unwrap();

        let rows = ledger.active_for(worker);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task_id, kept);
    }
}
