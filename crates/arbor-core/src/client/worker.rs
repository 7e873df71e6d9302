use std::thread::{self, JoinHandle};

use crate::config::SubStageDispatch;
use crate::error::{ArborError, Result};
use crate::models::SubStageBudget;

use super::Arbor;

impl Arbor {
    /// Hands a committed Main stage to the configured Sub-stage runner.
    /// Spawn failures leave the entry pending for the next sweep.
    pub(super) fn dispatch_sub_stage(&self, operation_id: &str) {
        match self.config.operations.dispatch {
            SubStageDispatch::Deferred => {
                tracing::debug!(
                    target: "arbor::operations",
                    operation_id,
                    "sub stage deferred to sweep"
                );
            }
            SubStageDispatch::Background => {
                let worker = self.clone();
                let id = operation_id.to_string();
                let short: String = id.chars().take(8).collect();
                let spawned = thread::Builder::new()
                    .name(format!("arbor-sub-{short}"))
                    .spawn(move || match worker.process_operation(&id, SubStageBudget::Unbounded) {
                        Ok(outcome) => tracing::debug!(
                            target: "arbor::operations",
                            operation_id = %id,
                            ?outcome,
                            "background sub stage finished"
                        ),
                        Err(err) => tracing::warn!(
                            target: "arbor::operations",
                            operation_id = %id,
                            error = %err,
                            "background sub stage errored"
                        ),
                    });
                match spawned {
                    Ok(handle) => match self.workers.lock() {
                        Ok(mut workers) => {
                            reap_finished(&mut workers);
                            workers.push(handle);
                        }
                        Err(_) => tracing::warn!(
                            target: "arbor::operations",
                            operation_id,
                            "worker registry lock poisoned; handle detached"
                        ),
                    },
                    Err(err) => tracing::warn!(
                        target: "arbor::operations",
                        operation_id,
                        error = %err,
                        "failed to spawn sub stage worker"
                    ),
                }
            }
        }
    }

    /// Joins background Sub-stage threads that already finished. Returns how
    /// many are still running.
    pub fn reap_background_workers(&self) -> Result<usize> {
        let mut workers = self
            .workers
            .lock()
            .map_err(|_| ArborError::lock_poisoned("workers"))?;
        reap_finished(&mut workers);
        Ok(workers.len())
    }

    /// Joins every background Sub-stage thread started so far. Returns how
    /// many were joined.
    pub fn wait_for_background_operations(&self) -> Result<usize> {
        let handles: Vec<_> = {
            let mut workers = self
                .workers
                .lock()
                .map_err(|_| ArborError::lock_poisoned("workers"))?;
            workers.drain(..).collect()
        };
        let mut joined = 0;
        for handle in handles {
            handle
                .join()
                .map_err(|_| ArborError::Internal("sub stage worker panicked".to_string()))?;
            joined += 1;
        }
        Ok(joined)
    }
}

fn reap_finished(workers: &mut Vec<JoinHandle<()>>) {
    let mut index = 0;
    while index < workers.len() {
        if !workers[index].is_finished() {
            index += 1;
            continue;
        }
        let handle = workers.swap_remove(index);
        if handle.join().is_err() {
            tracing::warn!(target: "arbor::operations", "background sub stage worker panicked");
        }
    }
}
