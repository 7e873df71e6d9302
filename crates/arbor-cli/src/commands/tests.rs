use std::fs;
use std::path::Path;

use arbor_core::models::{Grant, User};
use arbor_core::{Arbor, ArborConfig, SubStageDispatch};
use tempfile::tempdir;

use super::support::{read_body, viewer_from_identity};
use super::validation::command_needs_initialize;
use super::worker::run_operation_worker;
use crate::cli::{
    BodySource, Commands, IdentityArgs, OperationArgs, OperationCommand, PageArgs, PageCommand,
    RenameArgs, WebArgs,
};

fn deferred_app(root: &Path) -> Arbor {
    let mut config = ArborConfig::default();
    config.operations.dispatch = SubStageDispatch::Deferred;
    Arbor::with_config(root, config).expect("app")
}

fn run(app: &Arbor, root: &Path, viewer: &User, command: Commands) -> anyhow::Result<()> {
    super::validate_command_preflight(&command)?;
    super::run_validated(app, root, viewer, command)
}

fn create_command(path: &str, body: &str) -> Commands {
    Commands::Page(PageArgs {
        command: PageCommand::Create {
            path: path.to_string(),
            source: BodySource {
                body: Some(body.to_string()),
                ..BodySource::default()
            },
            grant: Grant::Public,
            granted_group: None,
            wip: false,
        },
    })
}

#[test]
fn missing_user_runs_as_guest() {
    let viewer = viewer_from_identity(&IdentityArgs {
        user: Some("  ".to_string()),
        admin: true,
        ..IdentityArgs::default()
    });
    assert!(viewer.is_guest());
    assert!(!viewer.is_admin);
}

#[test]
fn identity_flags_build_the_viewer() {
    let viewer = viewer_from_identity(&IdentityArgs {
        user: Some("alice".to_string()),
        name: Some("Alice".to_string()),
        groups: vec!["eng".to_string()],
        admin: true,
    });
    assert_eq!(viewer.id, "alice");
    assert_eq!(viewer.name, "Alice");
    assert_eq!(viewer.group_ids, vec!["eng"]);
    assert!(viewer.is_admin);
}

#[test]
fn web_skips_cli_initialize() {
    let command = Commands::Web(WebArgs {
        host: "127.0.0.1".to_string(),
        port: 8787,
    });
    assert!(!command_needs_initialize(&command));
    assert!(command_needs_initialize(&Commands::Init));
}

#[test]
fn update_without_a_body_source_is_rejected_before_opening_the_tree() {
    let command = Commands::Page(PageArgs {
        command: PageCommand::Update {
            page_id: "p1".to_string(),
            revision_id: None,
            source: BodySource::default(),
        },
    });
    let err = super::validate_command_preflight(&command).expect_err("missing body");
    assert!(err.to_string().contains("page body is required"));
}

#[test]
fn create_rejects_two_body_sources() {
    let command = Commands::Page(PageArgs {
        command: PageCommand::Create {
            path: "/a".to_string(),
            source: BodySource {
                body: Some("x".to_string()),
                stdin: true,
                ..BodySource::default()
            },
            grant: Grant::Public,
            granted_group: None,
            wip: false,
        },
    });
    let err = super::validate_command_preflight(&command).expect_err("two sources");
    assert!(err.to_string().contains("exactly one source"));
}

#[test]
fn body_is_read_from_file() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("body.md");
    fs::write(&path, "# From file").expect("write body");
    let body = read_body(
        BodySource {
            from: Some(path),
            ..BodySource::default()
        },
        true,
    )
    .expect("read body");
    assert_eq!(body, "# From file");
}

#[test]
fn missing_optional_body_reads_as_empty() {
    let body = read_body(BodySource::default(), false).expect("read body");
    assert!(body.is_empty());
}

#[test]
fn deferred_rename_is_finished_by_operation_work() {
    let temp = tempdir().expect("tempdir");
    let app = deferred_app(temp.path());
    let alice = User::new("alice", "Alice");

    run(&app, temp.path(), &alice, Commands::Init).expect("init");
    run(&app, temp.path(), &alice, create_command("/a", "# A")).expect("create a");
    run(&app, temp.path(), &alice, create_command("/a/child", "# Child")).expect("create child");

    let a = app.item_by_path("/a", &alice).expect("a");
    run(
        &app,
        temp.path(),
        &alice,
        Commands::Rename(RenameArgs {
            page_id: a.id,
            new_path: "/b".to_string(),
        }),
    )
    .expect("rename");
    assert_eq!(app.list_operations().expect("operations").len(), 1);

    let report = run_operation_worker(&app, 5, 0, true).expect("work");
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.iterations, 2);

    assert!(app.list_operations().expect("operations").is_empty());
    assert!(app.item_by_path("/b/child", &alice).is_ok());
    assert!(app.item_by_path("/a/child", &alice).is_err());
}

#[test]
fn operation_commands_run_against_an_idle_ledger() {
    let temp = tempdir().expect("tempdir");
    let app = deferred_app(temp.path());
    let admin = User::new("ops", "Ops").as_admin();

    for command in [
        OperationCommand::List,
        OperationCommand::Resume,
        OperationCommand::Recount,
        OperationCommand::Logs { limit: 10 },
    ] {
        run(
            &app,
            temp.path(),
            &admin,
            Commands::Operation(OperationArgs { command }),
        )
        .expect("operation command");
    }

    let err = run(
        &app,
        temp.path(),
        &admin,
        Commands::Operation(OperationArgs {
            command: OperationCommand::Show {
                operation_id: "missing".to_string(),
            },
        }),
    )
    .expect_err("missing operation");
    assert!(err.to_string().contains("operation not found"));
}
