use anyhow::Result;
use arbor_core::Arbor;
use arbor_core::models::{
    ChildrenTarget, CreatePageOptions, PageInfoOptions, PageInfoSelector, SubStageBudget, User,
};

use crate::cli::{OperationCommand, PageCommand};

use super::support::{print_json, read_body};
use super::worker::run_operation_worker;

pub(super) fn handle_page(app: &Arbor, viewer: &User, command: PageCommand) -> Result<()> {
    match command {
        PageCommand::Create {
            path,
            source,
            grant,
            granted_group,
            wip,
        } => {
            let body = read_body(source, false)?;
            let options = CreatePageOptions {
                grant,
                granted_group,
                wip,
            };
            let page = app.create_page(&path, &body, viewer, &options)?;
            print_json(&page)?;
        }
        PageCommand::Show { target, path } => {
            let page = if path {
                app.item_by_path(&target, viewer)?
            } else {
                app.item(&target, viewer)?
            };
            let revision = if page.revision_id.is_some() {
                Some(app.page_revision(&page.id, viewer)?)
            } else {
                None
            };
            print_json(&serde_json::json!({
                "page": page,
                "revision": revision,
            }))?;
        }
        PageCommand::Update {
            page_id,
            revision_id,
            source,
        } => {
            let body = read_body(source, true)?;
            let page = app.update_page(&page_id, revision_id.as_deref(), &body, viewer)?;
            print_json(&page)?;
        }
        PageCommand::Children { id, path } => {
            let target = ChildrenTarget::from_parts(id, path)?;
            let children = app.children(&target, viewer)?;
            print_json(&children)?;
        }
        PageCommand::Info {
            page_ids,
            path,
            bookmarks,
            short_body,
        } => {
            let selector = match path {
                Some(path) => PageInfoSelector::Path(path),
                None => PageInfoSelector::Ids(page_ids),
            };
            let options = PageInfoOptions {
                attach_bookmark_count: bookmarks,
                attach_short_body: short_body,
            };
            let info = app.page_info(&selector, viewer, options)?;
            print_json(&info)?;
        }
        PageCommand::Revisions { page_id, limit } => {
            let revisions = app.list_revisions(&page_id, limit, viewer)?;
            print_json(&revisions)?;
        }
    }
    Ok(())
}

pub(super) fn handle_operation(app: &Arbor, command: OperationCommand) -> Result<()> {
    match command {
        OperationCommand::List => {
            let operations = app.list_operations()?;
            print_json(&operations)?;
        }
        OperationCommand::Show { operation_id } => {
            let entry = app
                .operation(&operation_id)?
                .ok_or_else(|| anyhow::anyhow!("operation not found: {operation_id}"))?;
            print_json(&entry)?;
        }
        OperationCommand::Resume => {
            let report = app.resume_pending_operations()?;
            print_json(&report)?;
        }
        OperationCommand::Retry { operation_id } => {
            let outcome = app.retry_operation(&operation_id)?;
            print_json(&outcome)?;
        }
        OperationCommand::Process {
            operation_id,
            pages,
        } => {
            let budget = pages.map_or(SubStageBudget::Unbounded, SubStageBudget::Pages);
            let outcome = app.process_operation(&operation_id, budget)?;
            print_json(&outcome)?;
        }
        OperationCommand::Work {
            iterations,
            sleep_ms,
            stop_when_idle,
        } => {
            let report = run_operation_worker(app, iterations, sleep_ms, stop_when_idle)?;
            print_json(&report)?;
            if report.failed > 0 {
                tracing::warn!(
                    target: "arbor::cli",
                    failed = report.failed,
                    "failed operations remain; run `operation retry` once the cause is fixed"
                );
            }
        }
        OperationCommand::Recount => {
            let pages = app.recount_tree()?;
            print_json(&serde_json::json!({
                "status": "ok",
                "pages": pages,
            }))?;
        }
        OperationCommand::Logs { limit } => {
            let logs = app.list_request_logs(limit)?;
            print_json(&logs)?;
        }
    }
    Ok(())
}
