use std::path::Path;

use anyhow::{Context, Result};
use arbor_core::models::{
    DeleteOptions, DuplicateOptions, OperationHandle, RenameOptions, RevertOptions, User,
};
use arbor_core::{Arbor, ArborConfig, SubStageDispatch};

use crate::cli::{Commands, IdentityArgs};

mod handlers;
mod support;
mod validation;
mod web;
mod worker;

use self::handlers::{handle_operation, handle_page};
use self::support::{print_json, viewer_from_identity};
use self::validation::{command_needs_initialize, validate_command_preflight};
use self::web::{WebServeOptions, serve};

pub(crate) fn run_from_root(
    root: &Path,
    defer: bool,
    identity: &IdentityArgs,
    command: Commands,
) -> Result<()> {
    validate_command_preflight(&command)?;

    let mut config = ArborConfig::from_env().context("invalid arbor configuration")?;
    if defer {
        config.operations.dispatch = SubStageDispatch::Deferred;
    }
    let app = Arbor::with_config(root, config).context("failed to open page tree")?;
    let viewer = viewer_from_identity(identity);
    run_validated(&app, root, &viewer, command)
}

fn run_validated(app: &Arbor, root: &Path, viewer: &User, command: Commands) -> Result<()> {
    if command_needs_initialize(&command) {
        app.initialize()?;
    }

    match command {
        Commands::Init => {
            print_json(&serde_json::json!({
                "status": "ok",
                "root": root.display().to_string(),
            }))?;
        }
        Commands::Page(args) => handle_page(app, viewer, args.command)?,
        Commands::Rename(args) => {
            let options = RenameOptions {
                new_path: args.new_path,
            };
            let handle = app.rename_page(&args.page_id, &options, viewer)?;
            report_operation(app, &handle)?;
        }
        Commands::Delete(args) => {
            let options = DeleteOptions {
                is_recursively: args.recursive,
            };
            let handle = app.delete_page(&args.page_id, options, viewer)?;
            report_operation(app, &handle)?;
        }
        Commands::DeleteCompletely(args) => {
            let options = DeleteOptions {
                is_recursively: args.recursive,
            };
            let handle = app.delete_page_completely(&args.page_id, options, viewer)?;
            report_operation(app, &handle)?;
        }
        Commands::Duplicate(args) => {
            let options = DuplicateOptions {
                new_path: args.new_path,
                is_recursively: args.recursive,
                only_duplicate_user_related_resources: args.only_user_related,
            };
            let handle = app.duplicate_page(&args.page_id, &options, viewer)?;
            report_operation(app, &handle)?;
        }
        Commands::Revert(args) => {
            let options = RevertOptions {
                is_recursively: args.recursive,
            };
            let handle = app.revert_page(&args.page_id, options, viewer)?;
            report_operation(app, &handle)?;
        }
        Commands::Operation(args) => handle_operation(app, args.command)?,
        Commands::Web(args) => {
            serve(
                app,
                WebServeOptions {
                    host: &args.host,
                    port: args.port,
                },
            )?;
        }
    }
    Ok(())
}

/// Joins the background Sub-stage before reporting, so the printed ledger
/// entry is `null` once the operation has finished.
fn report_operation(app: &Arbor, handle: &OperationHandle) -> Result<()> {
    app.wait_for_background_operations()?;
    let entry = app.operation(&handle.operation_id)?;
    print_json(&serde_json::json!({
        "handle": handle,
        "operation": entry,
    }))
}

#[cfg(test)]
mod tests;
