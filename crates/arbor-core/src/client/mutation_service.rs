use std::time::Instant;

use rusqlite::Connection;
use serde_json::json;

use crate::config::OperationConfig;
use crate::error::{ArborError, Result};
use crate::events::PageEvent;
use crate::grant::can_view_page;
use crate::models::{
    ActionType, DeleteOptions, DuplicateOptions, NewOperation, OperationHandle, OperationOptions,
    OperationState, Page, RenameOptions, RevertOptions, User,
};
use crate::path::{
    from_trash_path, is_descendant, is_root, normalize_writable_path, to_trash_path,
};
use crate::state::{ledger, now_rfc3339, pages, rfc3339_after_secs};

use super::Arbor;
use super::mutation_stages::{StageContext, apply_main_stage, plan_main_copies};

/// What the caller asked for, before validation against the tree.
#[derive(Debug, Clone)]
enum MutationRequest {
    Rename {
        new_path: String,
    },
    Delete {
        is_recursively: bool,
    },
    DeleteCompletely {
        is_recursively: bool,
    },
    Duplicate {
        new_path: String,
        is_recursively: bool,
        only_related: bool,
    },
    Revert {
        is_recursively: bool,
    },
}

impl MutationRequest {
    const fn action_type(&self) -> ActionType {
        match self {
            Self::Rename { .. } => ActionType::Rename,
            Self::Delete { .. } => ActionType::Delete,
            Self::DeleteCompletely { .. } => ActionType::DeleteCompletely,
            Self::Duplicate { .. } => ActionType::Duplicate,
            Self::Revert { .. } => ActionType::Revert,
        }
    }
}

/// A validated request: where the subtree goes and with which options.
struct MutationPlan {
    to_path: Option<String>,
    options: OperationOptions,
}

impl Arbor {
    pub fn rename_page(
        &self,
        page_id: &str,
        options: &RenameOptions,
        user: &User,
    ) -> Result<OperationHandle> {
        self.start_operation(
            page_id,
            user,
            MutationRequest::Rename {
                new_path: options.new_path.clone(),
            },
        )
    }

    /// Moves the page (and, recursively, its subtree) into the trash.
    pub fn delete_page(
        &self,
        page_id: &str,
        options: DeleteOptions,
        user: &User,
    ) -> Result<OperationHandle> {
        self.start_operation(
            page_id,
            user,
            MutationRequest::Delete {
                is_recursively: options.is_recursively,
            },
        )
    }

    /// Removes pages, revisions and attachments for good.
    pub fn delete_page_completely(
        &self,
        page_id: &str,
        options: DeleteOptions,
        user: &User,
    ) -> Result<OperationHandle> {
        self.start_operation(
            page_id,
            user,
            MutationRequest::DeleteCompletely {
                is_recursively: options.is_recursively,
            },
        )
    }

    pub fn duplicate_page(
        &self,
        page_id: &str,
        options: &DuplicateOptions,
        user: &User,
    ) -> Result<OperationHandle> {
        self.start_operation(
            page_id,
            user,
            MutationRequest::Duplicate {
                new_path: options.new_path.clone(),
                is_recursively: options.is_recursively,
                only_related: options.only_duplicate_user_related_resources,
            },
        )
    }

    /// Brings a trashed page back to where it was deleted from.
    pub fn revert_page(
        &self,
        page_id: &str,
        options: RevertOptions,
        user: &User,
    ) -> Result<OperationHandle> {
        self.start_operation(
            page_id,
            user,
            MutationRequest::Revert {
                is_recursively: options.is_recursively,
            },
        )
    }

    /// Records the ledger entry, commits the Main stage and hands the Sub
    /// stage to the configured dispatcher. A failed Main stage removes the
    /// entry again.
    fn start_operation(
        &self,
        page_id: &str,
        user: &User,
        request: MutationRequest,
    ) -> Result<OperationHandle> {
        let started = Instant::now();
        let action = request.action_type();
        let output = (|| -> Result<OperationHandle> {
            if user.is_guest() {
                return Err(ArborError::PermissionDenied(format!(
                    "guests cannot {action} pages"
                )));
            }
            let operations = &self.config.operations;
            let entry = self.state.with_tx(|tx| {
                let now = now_rfc3339();
                let page = pages::page_by_id(tx, page_id)?
                    .ok_or_else(|| ArborError::NotFound(format!("page {page_id}")))?;
                let plan = plan_operation(tx, &page, user, &request, operations)?;
                let entry = ledger::insert_operation(
                    tx,
                    &NewOperation {
                        action_type: action,
                        page: page.snapshot(),
                        from_path: page.path.clone(),
                        to_path: plan.to_path,
                        options: plan.options,
                        user: user.clone(),
                        lease_until: rfc3339_after_secs(lease_secs(operations)),
                        lease_owner: self.instance_id.to_string(),
                    },
                    &now,
                )?;
                ledger::transition_operation(
                    tx,
                    &entry.id,
                    OperationState::Requested,
                    OperationState::MainInProgress,
                    &now,
                )?;
                Ok(entry)
            })?;

            let mut ctx = StageContext::new(self.uploader.as_ref());
            let main = self
                .state
                .with_conn(|conn| plan_main_copies(conn, &entry))
                .and_then(|planned| {
                    self.run_stage_tx(planned, &mut ctx, |tx, ctx| {
                        apply_main_stage(tx, &entry, ctx)?;
                        ledger::transition_operation(
                            tx,
                            &entry.id,
                            OperationState::MainInProgress,
                            OperationState::MainDone,
                            &ctx.now,
                        )?;
                        ledger::set_lease(tx, &entry.id, &ctx.now)
                    })
                });
            if let Err(err) = main {
                if let Err(cleanup) = self
                    .state
                    .with_conn(|conn| ledger::delete_operation(conn, &entry.id))
                {
                    tracing::warn!(
                        target: "arbor::operations",
                        operation_id = %entry.id,
                        error = %cleanup,
                        "failed to remove ledger entry of aborted main stage"
                    );
                }
                return Err(err);
            }

            for event in ctx.events.drain(..) {
                self.events.publish(&event);
            }
            self.events.publish(&PageEvent::OperationStarted {
                operation_id: entry.id.clone(),
                action_type: action,
                from_path: entry.from_path.clone(),
                to_path: entry.to_path.clone(),
            });
            tracing::info!(
                target: "arbor::operations",
                operation_id = %entry.id,
                action = %action,
                from = %entry.from_path,
                to = entry.to_path.as_deref().unwrap_or(""),
                "main stage committed"
            );
            self.dispatch_sub_stage(&entry.id);

            Ok(OperationHandle {
                operation_id: entry.id,
                action_type: action,
                page_id: entry.page.page_id,
                from_path: entry.from_path,
                to_path: entry.to_path,
            })
        })();
        self.finish_request(
            action.operation_name(),
            started,
            Some(page_id.to_string()),
            output,
            |handle| {
                Some(json!({
                    "operation_id": &handle.operation_id,
                    "from_path": &handle.from_path,
                    "to_path": &handle.to_path,
                }))
            },
        )
    }
}

pub(super) fn lease_secs(operations: &OperationConfig) -> i64 {
    i64::try_from(operations.lease_secs).unwrap_or(i64::MAX)
}

fn plan_operation(
    conn: &Connection,
    page: &Page,
    user: &User,
    request: &MutationRequest,
    operations: &OperationConfig,
) -> Result<MutationPlan> {
    if !can_view_page(user, page) {
        return Err(ArborError::PermissionDenied(format!(
            "{} is not visible to {}",
            page.path, user.id
        )));
    }
    match request {
        MutationRequest::Rename { new_path } => {
            ensure_live_non_root(page, "renamed")?;
            let to = normalize_writable_path(new_path)?;
            ensure_distinct_destination(&page.path, &to)?;
            if is_descendant(&page.path, &to) {
                return Err(ArborError::Validation(format!(
                    "cannot move {} onto its own ancestor {to}",
                    page.path
                )));
            }
            ensure_destination_free(conn, &page.path, &to, true)?;
            ensure_subtree_viewable(conn, &page.path, user)?;
            Ok(MutationPlan {
                to_path: Some(to),
                options: OperationOptions::default(),
            })
        }
        MutationRequest::Delete { is_recursively } => {
            ensure_live_non_root(page, "deleted")?;
            if page.is_empty {
                return Err(ArborError::Validation(format!(
                    "{} is an empty placeholder",
                    page.path
                )));
            }
            let trash = to_trash_path(&page.path);
            let occupied = if *is_recursively {
                pages::subtree_occupied(conn, &trash)?
            } else {
                pages::page_by_path(conn, &trash)?.is_some()
            };
            if occupied {
                return Err(ArborError::Conflict(format!(
                    "trash already holds {trash}; remove it completely first"
                )));
            }
            if *is_recursively {
                ensure_subtree_viewable(conn, &page.path, user)?;
            }
            Ok(MutationPlan {
                to_path: Some(trash),
                options: recursive_options(*is_recursively),
            })
        }
        MutationRequest::DeleteCompletely { is_recursively } => {
            if is_root(&page.path) {
                return Err(ArborError::Validation(
                    "the root page cannot be deleted".to_string(),
                ));
            }
            if !operations
                .complete_deletion_authority
                .permits(user, page.creator.as_deref())
            {
                return Err(ArborError::PermissionDenied(format!(
                    "{} may not delete {} completely under the {} policy",
                    user.id,
                    page.path,
                    operations.complete_deletion_authority.as_str()
                )));
            }
            if page.is_empty && !is_recursively {
                return Err(ArborError::Validation(format!(
                    "{} is an empty placeholder",
                    page.path
                )));
            }
            if *is_recursively {
                ensure_subtree_viewable(conn, &page.path, user)?;
            }
            Ok(MutationPlan {
                to_path: None,
                options: recursive_options(*is_recursively),
            })
        }
        MutationRequest::Duplicate {
            new_path,
            is_recursively,
            only_related,
        } => {
            ensure_live_non_root(page, "duplicated")?;
            if page.is_empty {
                return Err(ArborError::Validation(format!(
                    "{} is an empty placeholder",
                    page.path
                )));
            }
            let to = normalize_writable_path(new_path)?;
            ensure_distinct_destination(&page.path, &to)?;
            ensure_destination_free(conn, &page.path, &to, *is_recursively)?;
            if *is_recursively && !only_related {
                ensure_subtree_viewable(conn, &page.path, user)?;
            }
            let duplicated_page_id = match pages::page_by_path(conn, &to)? {
                Some(placeholder) => placeholder.id,
                None => uuid::Uuid::new_v4().to_string(),
            };
            Ok(MutationPlan {
                to_path: Some(to),
                options: OperationOptions {
                    is_recursively: *is_recursively,
                    only_duplicate_user_related_resources: *only_related,
                    duplicated_page_id: Some(duplicated_page_id),
                },
            })
        }
        MutationRequest::Revert { is_recursively } => {
            if !page.is_trashed() {
                return Err(ArborError::Validation(format!(
                    "{} is not in the trash",
                    page.path
                )));
            }
            let to = from_trash_path(&page.path).ok_or_else(|| {
                ArborError::Validation(format!("{} has no original location", page.path))
            })?;
            ensure_destination_free(conn, &page.path, &to, *is_recursively)?;
            if *is_recursively {
                ensure_subtree_viewable(conn, &page.path, user)?;
            }
            Ok(MutationPlan {
                to_path: Some(to),
                options: recursive_options(*is_recursively),
            })
        }
    }
}

fn recursive_options(is_recursively: bool) -> OperationOptions {
    OperationOptions {
        is_recursively,
        ..OperationOptions::default()
    }
}

fn ensure_live_non_root(page: &Page, verb: &str) -> Result<()> {
    if is_root(&page.path) {
        return Err(ArborError::Validation(format!(
            "the root page cannot be {verb}"
        )));
    }
    if page.is_trashed() {
        return Err(ArborError::Validation(format!(
            "{} is in the trash and cannot be {verb}",
            page.path
        )));
    }
    Ok(())
}

fn ensure_distinct_destination(from: &str, to: &str) -> Result<()> {
    if from == to {
        return Err(ArborError::Validation(format!(
            "destination equals the source: {to}"
        )));
    }
    if is_descendant(to, from) {
        return Err(ArborError::Validation(format!(
            "cannot place {from} inside its own subtree at {to}"
        )));
    }
    Ok(())
}

/// The destination itself may only hold an empty placeholder; with
/// `recursive`, no descendant may land on an authored page either.
fn ensure_destination_free(conn: &Connection, from: &str, to: &str, recursive: bool) -> Result<()> {
    if let Some(existing) = pages::page_by_path(conn, to)?
        && !existing.is_empty
    {
        return Err(ArborError::Conflict(format!("page already exists: {to}")));
    }
    if recursive && let Some(collision) = pages::first_subtree_collision(conn, from, to)? {
        return Err(ArborError::Conflict(format!(
            "page already exists: {collision}"
        )));
    }
    Ok(())
}

fn ensure_subtree_viewable(conn: &Connection, base: &str, user: &User) -> Result<()> {
    let hidden = pages::count_unviewable_in_subtree(conn, base, user)?;
    if hidden > 0 {
        return Err(ArborError::PermissionDenied(format!(
            "{hidden} page(s) under {base} are not visible to {}",
            user.id
        )));
    }
    Ok(())
}
