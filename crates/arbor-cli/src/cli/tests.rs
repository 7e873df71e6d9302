use super::*;
use arbor_core::models::Grant;
use clap::Parser;

#[test]
fn root_defaults_to_dot_arbor_and_guest_identity() {
    let cli = Cli::try_parse_from(["arbor", "init"]).expect("parse");
    assert_eq!(cli.root, PathBuf::from(".arbor"));
    assert!(cli.identity.user.is_none());
    assert!(!cli.identity.admin);
    assert!(!cli.defer);
    assert!(matches!(cli.command, Commands::Init));
}

#[test]
fn identity_flags_are_accepted_after_the_subcommand() {
    let cli = Cli::try_parse_from([
        "arbor", "rename", "p1", "/b", "--user", "alice", "--group", "eng", "--group", "ops",
        "--admin",
    ])
    .expect("parse");
    assert_eq!(cli.identity.user.as_deref(), Some("alice"));
    assert_eq!(cli.identity.groups, vec!["eng", "ops"]);
    assert!(cli.identity.admin);
    match cli.command {
        Commands::Rename(RenameArgs { page_id, new_path }) => {
            assert_eq!(page_id, "p1");
            assert_eq!(new_path, "/b");
        }
        _ => panic!("expected rename command"),
    }
}

#[test]
fn page_create_parses_grant_and_inline_body() {
    let cli = Cli::try_parse_from([
        "arbor",
        "page",
        "create",
        "/team/notes",
        "--body",
        "- item",
        "--grant",
        "user_group",
        "--granted-group",
        "eng",
    ])
    .expect("parse");
    match cli.command {
        Commands::Page(PageArgs {
            command:
                PageCommand::Create {
                    path,
                    source,
                    grant,
                    granted_group,
                    wip,
                },
        }) => {
            assert_eq!(path, "/team/notes");
            assert_eq!(source.body.as_deref(), Some("- item"));
            assert_eq!(grant, Grant::UserGroup);
            assert_eq!(granted_group.as_deref(), Some("eng"));
            assert!(!wip);
        }
        _ => panic!("expected page create command"),
    }
}

#[test]
fn page_create_rejects_unknown_grant() {
    let parsed = Cli::try_parse_from(["arbor", "page", "create", "/a", "--grant", "everyone"]);
    assert!(parsed.is_err(), "unknown grant must be rejected");
}

#[test]
fn page_children_requires_exactly_one_target() {
    assert!(Cli::try_parse_from(["arbor", "page", "children"]).is_err());
    assert!(
        Cli::try_parse_from(["arbor", "page", "children", "--id", "p1", "--path", "/a"]).is_err()
    );
    let cli = Cli::try_parse_from(["arbor", "page", "children", "--path", "/a"]).expect("parse");
    match cli.command {
        Commands::Page(PageArgs {
            command: PageCommand::Children { id, path },
        }) => {
            assert!(id.is_none());
            assert_eq!(path.as_deref(), Some("/a"));
        }
        _ => panic!("expected page children command"),
    }
}

#[test]
fn page_info_collects_repeated_ids() {
    let cli = Cli::try_parse_from([
        "arbor",
        "page",
        "info",
        "--page-id",
        "p1",
        "--page-id",
        "p2",
        "--short-body",
    ])
    .expect("parse");
    match cli.command {
        Commands::Page(PageArgs {
            command:
                PageCommand::Info {
                    page_ids,
                    path,
                    bookmarks,
                    short_body,
                },
        }) => {
            assert_eq!(page_ids, vec!["p1", "p2"]);
            assert!(path.is_none());
            assert!(!bookmarks);
            assert!(short_body);
        }
        _ => panic!("expected page info command"),
    }
}

#[test]
fn delete_recursion_defaults_on_and_can_be_disabled() {
    let cli = Cli::try_parse_from(["arbor", "delete", "p1"]).expect("parse");
    match cli.command {
        Commands::Delete(DeleteArgs { recursive, .. }) => assert!(recursive),
        _ => panic!("expected delete command"),
    }

    let cli = Cli::try_parse_from(["arbor", "delete-completely", "p1", "--recursive", "false"])
        .expect("parse");
    match cli.command {
        Commands::DeleteCompletely(DeleteArgs { page_id, recursive }) => {
            assert_eq!(page_id, "p1");
            assert!(!recursive);
        }
        _ => panic!("expected delete-completely command"),
    }
}

#[test]
fn operation_work_parses_loop_options() {
    let cli = Cli::try_parse_from([
        "arbor",
        "--defer",
        "operation",
        "work",
        "--iterations",
        "3",
        "--sleep-ms",
        "0",
    ])
    .expect("parse");
    assert!(cli.defer);
    match cli.command {
        Commands::Operation(OperationArgs {
            command:
                OperationCommand::Work {
                    iterations,
                    sleep_ms,
                    stop_when_idle,
                },
        }) => {
            assert_eq!(iterations, 3);
            assert_eq!(sleep_ms, 0);
            assert!(stop_when_idle);
        }
        _ => panic!("expected operation work command"),
    }
}

#[test]
fn operation_process_rejects_zero_page_budget() {
    let parsed = Cli::try_parse_from(["arbor", "operation", "process", "op-1", "--pages", "0"]);
    assert!(parsed.is_err(), "zero page budget must be rejected");
}

#[test]
fn web_defaults_to_local_port() {
    let cli = Cli::try_parse_from(["arbor", "web"]).expect("parse");
    match cli.command {
        Commands::Web(WebArgs { host, port }) => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(port, 8787);
        }
        _ => panic!("expected web command"),
    }
}
