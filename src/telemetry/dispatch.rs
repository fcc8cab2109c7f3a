//! Checkin span helpers.

use tracing::Span;

use crate::envelope::EnvelopeKind;
use crate::model::{Status, TaskId, WorkerId};

/// Start a span covering one checkin exchange.
///
/// `checkin.tasks` is declared empty and filled in once the reply is built.
pub fn start_checkin_span(worker_id: &WorkerId, kind: EnvelopeKind) -> Span {
    tracing::info_span!(
        "checkin",
        "worker.id" = %worker_id,
        "envelope.kind" = %kind,
        "checkin.tasks" = tracing::field::Empty,
    )
}

/// Emit a status transition event inside `span`.
pub fn record_state_transition(span: &Span, task_id: &TaskId, from: Status, to: Status) {
    span.in_scope(|| {
        tracing::info!(task_id = %task_id, from = %from, to = %to, "state_transition");
    });
}
