use std::thread;
use std::time::Duration;

use anyhow::Result;
use arbor_core::Arbor;

#[derive(Debug, serde::Serialize, Default, PartialEq, Eq)]
pub(super) struct OperationWorkReport {
    pub(super) iterations: u32,
    pub(super) reclaimed: usize,
    pub(super) scanned: usize,
    pub(super) discarded: usize,
    pub(super) completed: usize,
    pub(super) interrupted: usize,
    pub(super) retrying: usize,
    pub(super) busy: usize,
    /// Failed entries still in the ledger after the last sweep.
    pub(super) failed: usize,
}

/// Runs resumption sweeps until nothing but failed entries remain, or the
/// iteration cap is reached.
pub(super) fn run_operation_worker(
    app: &Arbor,
    iterations: u32,
    sleep_ms: u64,
    stop_when_idle: bool,
) -> Result<OperationWorkReport> {
    let mut total = OperationWorkReport::default();
    for i in 0..iterations {
        let report = app.resume_pending_operations()?;
        total.iterations = i + 1;
        total.reclaimed += report.reclaimed;
        total.scanned += report.scanned;
        total.discarded += report.discarded;
        total.completed += report.completed;
        total.interrupted += report.interrupted;
        total.retrying += report.retrying;
        total.busy += report.busy;
        total.failed = report.failed;

        let pending = report.scanned.saturating_sub(report.failed);
        if stop_when_idle && pending == 0 {
            break;
        }
        if i + 1 < iterations {
            thread::sleep(Duration::from_millis(sleep_ms));
        }
    }
    tracing::debug!(
        target: "arbor::cli",
        iterations = total.iterations,
        completed = total.completed,
        failed = total.failed,
        "operation worker finished"
    );
    Ok(total)
}
