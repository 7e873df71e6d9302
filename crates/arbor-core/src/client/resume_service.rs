use std::sync::atomic::Ordering;
use std::time::Instant;

use serde_json::json;

use crate::error::{ArborError, Result};
use crate::models::{OperationState, ResumeReport, SubStageBudget, SubStageOutcome};
use crate::state::{ledger, now_rfc3339, rfc3339_after_secs};

use super::Arbor;
use super::mutation_service::lease_secs;

impl Arbor {
    /// Sweep: drives every unfinished entry forward.
    ///
    /// The first sweep of an instance is its startup sweep and first expires
    /// leases other instances left behind, so work a crashed process held is
    /// picked up at once. Entries whose Main stage never committed left no
    /// tree changes behind and are discarded. Entries whose lease is still
    /// held, or whose retry backoff has not elapsed, are left alone. Failed
    /// entries wait for [`Arbor::retry_operation`].
    pub fn resume_pending_operations(&self) -> Result<ResumeReport> {
        let started = Instant::now();
        let output = (|| -> Result<ResumeReport> {
            let reclaimed = self.reclaim_foreign_leases()?;
            let entries = self.state.with_conn(ledger::list_operations)?;
            let mut report = ResumeReport {
                reclaimed,
                scanned: entries.len(),
                ..ResumeReport::default()
            };
            let lease = lease_secs(&self.config.operations);

            for entry in entries {
                if entry.state == OperationState::Failed {
                    report.failed += 1;
                    continue;
                }
                if !entry.state.main_committed() {
                    let discarded = self.state.with_tx(|tx| {
                        if !ledger::claim_lease(
                            tx,
                            &entry.id,
                            &self.instance_id,
                            &now_rfc3339(),
                            &rfc3339_after_secs(lease),
                        )? {
                            return Ok(false);
                        }
                        ledger::delete_operation(tx, &entry.id)
                    })?;
                    if discarded {
                        tracing::info!(
                            target: "arbor::operations",
                            operation_id = %entry.id,
                            state = %entry.state,
                            "discarded operation whose main stage never committed"
                        );
                        self.log_operation_skip(&entry, "main_not_committed");
                        report.discarded += 1;
                    } else {
                        report.busy += 1;
                    }
                    continue;
                }

                match self.process_operation(&entry.id, SubStageBudget::Unbounded) {
                    Ok(SubStageOutcome::Completed { .. }) => report.completed += 1,
                    Ok(SubStageOutcome::Interrupted { .. }) => report.interrupted += 1,
                    Ok(SubStageOutcome::Retrying { .. }) => report.retrying += 1,
                    Ok(SubStageOutcome::Busy) => report.busy += 1,
                    Ok(SubStageOutcome::Failed { .. }) => report.failed += 1,
                    // Finished by a concurrent worker between listing and processing.
                    Err(ArborError::NotFound(_)) => report.completed += 1,
                    Err(err) => {
                        tracing::warn!(
                            target: "arbor::operations",
                            operation_id = %entry.id,
                            error = %err,
                            "resume failed"
                        );
                        report.failed += 1;
                    }
                }
            }
            Ok(report)
        })();
        self.finish_request(
            "operation.resume",
            started,
            None,
            output,
            |report| serde_json::to_value(report).ok(),
        )
    }

    /// Runs once per instance; later calls report nothing reclaimed.
    fn reclaim_foreign_leases(&self) -> Result<usize> {
        if self.leases_reclaimed.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let reclaimed = self
            .state
            .with_conn(|conn| ledger::expire_foreign_leases(conn, &self.instance_id, &now_rfc3339()));
        match reclaimed {
            Ok(count) => {
                if count > 0 {
                    tracing::info!(
                        target: "arbor::operations",
                        count,
                        instance_id = %self.instance_id,
                        "reclaimed leases left by another instance"
                    );
                }
                Ok(count)
            }
            Err(err) => {
                self.leases_reclaimed.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Gives a failed entry a fresh attempt budget and runs its Sub stage.
    pub fn retry_operation(&self, operation_id: &str) -> Result<SubStageOutcome> {
        let started = Instant::now();
        let output = (|| -> Result<()> {
            self.state.with_tx(|tx| {
                let entry = ledger::operation_by_id(tx, operation_id)?
                    .ok_or_else(|| ArborError::NotFound(format!("operation {operation_id}")))?;
                if entry.state != OperationState::Failed {
                    return Err(ArborError::Conflict(format!(
                        "operation {operation_id} is {} and cannot be retried",
                        entry.state
                    )));
                }
                ledger::reopen_failed_operation(tx, operation_id, &now_rfc3339())?;
                Ok(())
            })
        })();
        self.finish_request(
            "operation.retry",
            started,
            Some(operation_id.to_string()),
            output,
            |()| Some(json!({ "operation_id": operation_id })),
        )?;
        self.process_operation(operation_id, SubStageBudget::Unbounded)
    }
}
