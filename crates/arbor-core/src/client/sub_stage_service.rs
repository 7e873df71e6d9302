use std::time::Instant;

use rusqlite::Connection;
use serde_json::json;

use crate::error::{ArborError, Result};
use crate::events::PageEvent;
use crate::models::{OperationEntry, OperationState, SubStageBudget, SubStageOutcome};
use crate::operation_policy::{retry_backoff_seconds, should_retry_operation};
use crate::state::{ledger, now_rfc3339, rfc3339_after_secs};

use super::Arbor;
use super::mutation_service::lease_secs;
use super::mutation_stages::{
    PlannedCopy, StageContext, apply_sub_batch, delete_objects, finalize_operation,
    plan_sub_batch_copies, stage_object_copies,
};

impl Arbor {
    /// Runs the Sub stage of `operation_id` in batches of the configured
    /// size until it finishes or `budget` descendants have been processed.
    ///
    /// Transient failures are recorded against the entry and retried after a
    /// backoff until the attempt cap; anything else marks it failed. Both
    /// come back as an outcome rather than an error.
    pub fn process_operation(
        &self,
        operation_id: &str,
        budget: SubStageBudget,
    ) -> Result<SubStageOutcome> {
        let started = Instant::now();
        let output = (|| -> Result<SubStageOutcome> {
            let now = now_rfc3339();
            let lease = lease_secs(&self.config.operations);
            let claimed = self.state.with_tx(|tx| {
                let entry = ledger::operation_by_id(tx, operation_id)?
                    .ok_or_else(|| ArborError::NotFound(format!("operation {operation_id}")))?;
                if entry.state == OperationState::Failed {
                    return Ok(Err(SubStageOutcome::Failed {
                        error: entry.last_error.unwrap_or_default(),
                    }));
                }
                if !entry.state.main_committed() {
                    return Err(ArborError::Conflict(format!(
                        "operation {operation_id} has not committed its main stage"
                    )));
                }
                if !ledger::claim_lease(
                    tx,
                    operation_id,
                    &self.instance_id,
                    &now,
                    &rfc3339_after_secs(lease),
                )? {
                    return Ok(Err(SubStageOutcome::Busy));
                }
                if entry.state == OperationState::MainDone {
                    ledger::transition_operation(
                        tx,
                        operation_id,
                        OperationState::MainDone,
                        OperationState::SubInProgress,
                        &now,
                    )?;
                }
                Ok(Ok(entry))
            })?;
            let entry = match claimed {
                Ok(entry) => entry,
                Err(outcome) => return Ok(outcome),
            };

            match self.run_sub_stage(&entry, budget) {
                Ok(outcome) => Ok(outcome),
                Err(err) => self.record_sub_stage_failure(&entry, &err),
            }
        })();
        self.finish_request(
            "operation.process",
            started,
            Some(operation_id.to_string()),
            output,
            |outcome| serde_json::to_value(outcome).ok(),
        )
    }

    fn run_sub_stage(
        &self,
        entry: &OperationEntry,
        budget: SubStageBudget,
    ) -> Result<SubStageOutcome> {
        let batch_size = self.config.operations.batch_size.max(1);
        let lease = lease_secs(&self.config.operations);
        let mut processed = 0_usize;
        loop {
            let limit = match budget {
                SubStageBudget::Unbounded => batch_size,
                SubStageBudget::Pages(max) => batch_size.min(max.saturating_sub(processed)),
            };
            if limit == 0 {
                self.state
                    .with_conn(|conn| ledger::set_lease(conn, &entry.id, &now_rfc3339()))?;
                tracing::debug!(
                    target: "arbor::operations",
                    operation_id = %entry.id,
                    processed,
                    "sub stage paused at budget"
                );
                return Ok(SubStageOutcome::Interrupted { processed });
            }

            let planned = self.state.with_conn(|conn| {
                let current = ledger::operation_by_id(conn, &entry.id)?
                    .ok_or_else(|| ArborError::NotFound(format!("operation {}", entry.id)))?;
                plan_sub_batch_copies(conn, &current, limit)
            })?;
            let mut ctx = StageContext::new(self.uploader.as_ref());
            let examined = self.run_stage_tx(planned, &mut ctx, |tx, ctx| {
                let current = ledger::operation_by_id(tx, &entry.id)?
                    .ok_or_else(|| ArborError::NotFound(format!("operation {}", entry.id)))?;
                if !self.holds_lease(&current) {
                    ctx.staged_copies.clear();
                    return Ok(None);
                }
                let examined = apply_sub_batch(tx, &current, limit, ctx)?;
                ledger::set_lease(tx, &entry.id, &rfc3339_after_secs(lease))?;
                Ok(Some(examined))
            })?;
            let Some(examined) = examined else {
                return Ok(lease_lost(entry, processed));
            };
            for event in ctx.events.drain(..) {
                self.events.publish(&event);
            }
            processed += examined;
            if examined < limit {
                break;
            }
        }

        let mut ctx = StageContext::new(self.uploader.as_ref());
        let finished = self.run_stage_tx(Vec::new(), &mut ctx, |tx, ctx| {
            let current = ledger::operation_by_id(tx, &entry.id)?
                .ok_or_else(|| ArborError::NotFound(format!("operation {}", entry.id)))?;
            if !self.holds_lease(&current) {
                return Ok(false);
            }
            finalize_operation(tx, entry, ctx)?;
            ledger::transition_operation(
                tx,
                &entry.id,
                OperationState::SubInProgress,
                OperationState::SubDone,
                &ctx.now,
            )?;
            ledger::delete_operation(tx, &entry.id)?;
            Ok(true)
        })?;
        if !finished {
            return Ok(lease_lost(entry, processed));
        }
        for event in ctx.events.drain(..) {
            self.events.publish(&event);
        }
        self.events.publish(&PageEvent::OperationCompleted {
            operation_id: entry.id.clone(),
            action_type: entry.action_type,
            from_path: entry.from_path.clone(),
            to_path: entry.to_path.clone(),
        });
        tracing::info!(
            target: "arbor::operations",
            operation_id = %entry.id,
            action = %entry.action_type,
            processed,
            "operation completed"
        );
        Ok(SubStageOutcome::Completed { processed })
    }

    /// Runs one stage step in a transaction with the object store kept out
    /// of it: `planned` copies are made first and objects the step released
    /// are deleted after commit. Staged copies nothing recorded are removed,
    /// all of them when the transaction rolls back.
    pub(super) fn run_stage_tx<T>(
        &self,
        planned: Vec<PlannedCopy>,
        ctx: &mut StageContext<'_>,
        step: impl FnOnce(&Connection, &mut StageContext<'_>) -> Result<T>,
    ) -> Result<T> {
        let staged = stage_object_copies(ctx.uploader, planned)?;
        ctx.staged_copies = staged.clone();
        let committed = self.state.with_tx(|tx| {
            let conn: &Connection = tx;
            step(conn, ctx)
        });
        match committed {
            Ok(_) => {
                delete_objects(ctx.uploader, ctx.released_objects.drain(..));
                delete_objects(ctx.uploader, ctx.staged_copies.drain().map(|(_, key)| key));
            }
            Err(_) => {
                ctx.released_objects.clear();
                ctx.staged_copies.clear();
                delete_objects(ctx.uploader, staged.into_values());
            }
        }
        committed
    }

    fn holds_lease(&self, entry: &OperationEntry) -> bool {
        entry.locked_by.as_deref() == Some(&*self.instance_id)
    }

    fn record_sub_stage_failure(
        &self,
        entry: &OperationEntry,
        err: &ArborError,
    ) -> Result<SubStageOutcome> {
        let attempt = entry.attempt_count.saturating_add(1);
        let message = err.to_string();
        let now = now_rfc3339();
        let retry =
            err.is_transient() && should_retry_operation(attempt, self.config.operations.max_attempts);
        if retry {
            let delay = retry_backoff_seconds(entry.action_type, attempt, &entry.id);
            let next_attempt_at = rfc3339_after_secs(delay);
            self.state.with_conn(|conn| {
                ledger::record_attempt_failure(
                    conn,
                    &entry.id,
                    attempt,
                    &message,
                    false,
                    &next_attempt_at,
                    &now,
                )
            })?;
            tracing::warn!(
                target: "arbor::operations",
                operation_id = %entry.id,
                attempt,
                retry_in_secs = delay,
                error = %message,
                "sub stage failed; retry scheduled"
            );
            return Ok(SubStageOutcome::Retrying {
                attempt,
                next_attempt_at,
            });
        }

        self.state.with_conn(|conn| {
            ledger::record_attempt_failure(conn, &entry.id, attempt, &message, true, &now, &now)
        })?;
        self.events.publish(&PageEvent::OperationFailed {
            operation_id: entry.id.clone(),
            action_type: entry.action_type,
            error: message.clone(),
        });
        tracing::warn!(
            target: "arbor::operations",
            operation_id = %entry.id,
            attempt,
            code = err.code(),
            error = %message,
            "sub stage failed permanently"
        );
        Ok(SubStageOutcome::Failed { error: message })
    }

    /// Entry details for monitoring; `None` once the operation finished.
    pub fn operation(&self, operation_id: &str) -> Result<Option<OperationEntry>> {
        self.state
            .with_conn(|conn| ledger::operation_by_id(conn, operation_id))
    }

    /// Every unfinished entry, oldest first.
    pub fn list_operations(&self) -> Result<Vec<OperationEntry>> {
        self.state.with_conn(ledger::list_operations)
    }

    pub(super) fn log_operation_skip(&self, entry: &OperationEntry, reason: &str) {
        self.log_request_status(
            uuid::Uuid::new_v4().to_string(),
            "operation.process",
            "skipped",
            Instant::now(),
            Some(entry.from_path.clone()),
            Some(json!({ "operation_id": &entry.id, "reason": reason })),
        );
    }
}

/// Another instance took the lease over and finishes the work.
fn lease_lost(entry: &OperationEntry, processed: usize) -> SubStageOutcome {
    tracing::info!(
        target: "arbor::operations",
        operation_id = %entry.id,
        processed,
        "lease taken over by another instance; stopping"
    );
    SubStageOutcome::Busy
}
