use tempfile::tempdir;

use crate::models::{
    ActionType, Grant, NewOperation, OperationOptions, OperationState, Page, PageSnapshot,
    PageStatus, User,
};

use super::*;

fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let temp = tempdir().expect("tempdir");
    let store = SqliteStore::open(temp.path().join("state.db")).expect("open failed");
    (temp, store)
}

fn page(path: &str, parent_id: Option<&str>) -> Page {
    let now = now_rfc3339();
    Page {
        id: uuid::Uuid::new_v4().to_string(),
        path: path.to_string(),
        parent_id: parent_id.map(ToString::to_string),
        descendant_count: 0,
        grant: Grant::Public,
        granted_user: None,
        granted_group: None,
        creator: Some("alice".to_string()),
        revision_id: None,
        is_empty: false,
        wip: false,
        status: PageStatus::Published,
        created_at: now.clone(),
        updated_at: now,
        process_data: None,
    }
}

fn seed(store: &SqliteStore, paths: &[&str]) -> Vec<Page> {
    store
        .with_tx(|tx| {
            let mut out = Vec::new();
            for path in paths {
                let parent_id = if *path == "/" {
                    None
                } else {
                    Some(pages::ensure_parent(tx, path, &now_rfc3339())?)
                };
                let page = page(path, parent_id.as_deref());
                pages::insert_page(tx, &page)?;
                out.push(page);
            }
            Ok(out)
        })
        .expect("seed")
}

fn new_operation(from: &str, to: Option<&str>) -> NewOperation {
    NewOperation {
        action_type: ActionType::Rename,
        page: PageSnapshot {
            page_id: format!("id-{from}"),
            path: from.to_string(),
            parent_id: None,
            grant: Grant::Public,
            granted_user: None,
            granted_group: None,
            creator: None,
            status: PageStatus::Published,
            is_empty: false,
        },
        from_path: from.to_string(),
        to_path: to.map(ToString::to_string),
        options: OperationOptions::default(),
        user: User::new("alice", "Alice"),
        lease_until: now_rfc3339(),
        lease_owner: "instance-a".to_string(),
    }
}

#[test]
fn migrate_records_schema_version_and_is_repeatable() {
    let (_temp, store) = open_store();
    store.migrate().expect("second migrate");
    assert!(store.has_migration("arbor-0001-page-tree").expect("has"));
    assert!(
        store
            .has_migration("arbor-0002-operation-lease-owner")
            .expect("has")
    );
    assert!(
        !store
            .has_migration(KNOWN_BAD_REVISION_MIGRATION)
            .expect("has bad")
    );
    store
        .record_migration(KNOWN_BAD_REVISION_MIGRATION)
        .expect("record");
    assert!(
        store
            .has_migration(KNOWN_BAD_REVISION_MIGRATION)
            .expect("has bad")
    );
}

#[cfg(unix)]
#[test]
fn open_hardens_state_db_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempdir().expect("tempdir");
    let db_path = temp.path().join("state.db");
    let store = SqliteStore::open(&db_path).expect("open failed");
    store.set_system_value("k", "v").expect("set");

    let mode = std::fs::metadata(&db_path)
        .expect("metadata")
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn system_values_upsert() {
    let (_temp, store) = open_store();
    assert_eq!(store.get_system_value("k").expect("get"), None);
    store.set_system_value("k", "1").expect("set");
    store.set_system_value("k", "2").expect("set again");
    assert_eq!(store.get_system_value("k").expect("get").as_deref(), Some("2"));
}

#[test]
fn ensure_parent_creates_placeholders_and_prune_removes_them() {
    let (_temp, store) = open_store();
    seed(&store, &["/"]);
    let leaf = seed(&store, &["/a/b/c"]).remove(0);

    store
        .with_conn(|conn| {
            let a = pages::page_by_path(conn, "/a")?.expect("placeholder /a");
            let b = pages::page_by_path(conn, "/a/b")?.expect("placeholder /a/b");
            assert!(a.is_empty && b.is_empty);
            assert_eq!(leaf.parent_id.as_deref(), Some(b.id.as_str()));
            assert_eq!(b.parent_id.as_deref(), Some(a.id.as_str()));

            pages::delete_page_row(conn, &leaf.id)?;
            let removed = pages::prune_empty_leaves(conn, "/a/b")?;
            assert_eq!(removed, 2);
            assert!(pages::page_by_path(conn, "/a")?.is_none());
            assert!(pages::page_by_path(conn, "/")?.is_some());
            Ok(())
        })
        .expect("check");
}

#[test]
fn duplicate_path_insert_is_conflict() {
    let (_temp, store) = open_store();
    seed(&store, &["/", "/a"]);
    let err = store
        .with_tx(|tx| {
            let parent = pages::ensure_parent(tx, "/a", &now_rfc3339())?;
            pages::insert_page(tx, &page("/a", Some(&parent)))
        })
        .expect_err("duplicate");
    assert_eq!(err.code(), "CONFLICT");
}

#[test]
fn descendant_batches_respect_order_and_cursor() {
    let (_temp, store) = open_store();
    seed(&store, &["/", "/a", "/a/x", "/a/x/deep", "/a/y", "/ab"]);
    store
        .with_conn(|conn| {
            let asc = pages::descendants_batch(conn, "/a", None, 10, pages::ScanOrder::Ascending)?;
            let paths: Vec<_> = asc.iter().map(|p| p.path.as_str()).collect();
            assert_eq!(paths, vec!["/a/x", "/a/x/deep", "/a/y"]);

            let next =
                pages::descendants_batch(conn, "/a", Some("/a/x"), 1, pages::ScanOrder::Ascending)?;
            assert_eq!(next[0].path, "/a/x/deep");

            let desc =
                pages::descendants_batch(conn, "/a", None, 10, pages::ScanOrder::Descending)?;
            let paths: Vec<_> = desc.iter().map(|p| p.path.as_str()).collect();
            assert_eq!(paths, vec!["/a/y", "/a/x/deep", "/a/x"]);
            Ok(())
        })
        .expect("batches");
}

#[test]
fn recount_and_adjust_keep_counts_consistent() {
    let (_temp, store) = open_store();
    let seeded = seed(&store, &["/", "/a", "/a/x", "/a/y"]);
    store
        .with_tx(|tx| {
            let updated = descendants::recount_subtree(tx, "/")?;
            assert_eq!(updated, 4);
            Ok(())
        })
        .expect("recount");

    store
        .with_conn(|conn| {
            assert_eq!(pages::page_by_path(conn, "/")?.expect("root").descendant_count, 3);
            assert_eq!(pages::page_by_path(conn, "/a")?.expect("a").descendant_count, 2);

            descendants::adjust_descendant_count(conn, &seeded[2].id, -1, false)?;
            assert_eq!(pages::page_by_path(conn, "/")?.expect("root").descendant_count, 2);
            assert_eq!(pages::page_by_path(conn, "/a")?.expect("a").descendant_count, 1);
            assert_eq!(pages::page_by_path(conn, "/a/x")?.expect("x").descendant_count, 0);

            descendants::recount_descendants(conn, &["/".to_string(), "/a".to_string()])?;
            descendants::recount_descendants(conn, &["/".to_string(), "/a".to_string()])?;
            assert_eq!(pages::page_by_path(conn, "/")?.expect("root").descendant_count, 3);
            assert_eq!(pages::page_by_path(conn, "/a")?.expect("a").descendant_count, 2);
            Ok(())
        })
        .expect("counts");
}

#[test]
fn unviewable_count_honours_owner_and_group_grants() {
    let (_temp, store) = open_store();
    seed(&store, &["/"]);
    store
        .with_tx(|tx| {
            let root = pages::page_by_path(tx, "/")?.expect("root");
            let mut mine = page("/s", Some(&root.id));
            mine.grant = Grant::Owner;
            mine.granted_user = Some("alice".to_string());
            pages::insert_page(tx, &mine)?;
            let mut group = page("/s/g", Some(&mine.id));
            group.grant = Grant::UserGroup;
            group.granted_group = Some("eng".to_string());
            pages::insert_page(tx, &group)?;
            Ok(())
        })
        .expect("seed grants");

    store
        .with_conn(|conn| {
            let alice = User::new("alice", "Alice");
            assert_eq!(pages::count_unviewable_in_subtree(conn, "/s", &alice)?, 1);
            let alice_eng = User::new("alice", "Alice").with_groups(["eng"]);
            assert_eq!(pages::count_unviewable_in_subtree(conn, "/s", &alice_eng)?, 0);
            let bob = User::new("bob", "Bob");
            assert_eq!(pages::count_unviewable_in_subtree(conn, "/s", &bob)?, 2);
            let admin = User::new("root", "Root").as_admin();
            assert_eq!(pages::count_unviewable_in_subtree(conn, "/s", &admin)?, 0);
            Ok(())
        })
        .expect("counts");
}

#[test]
fn ledger_rejects_overlapping_subtrees() {
    let (_temp, store) = open_store();
    let now = now_rfc3339();
    store
        .with_tx(|tx| ledger::insert_operation(tx, &new_operation("/a", Some("/b")), &now))
        .expect("first");

    for (from, to) in [
        ("/a/x", Some("/c")),
        ("/c", Some("/b/inner")),
        ("/", None),
        ("/d", Some("/a")),
    ] {
        let err = store
            .with_tx(|tx| ledger::insert_operation(tx, &new_operation(from, to), &now))
            .expect_err("overlap");
        assert_eq!(err.code(), "CONFLICT", "{from} -> {to:?}");
    }

    store
        .with_tx(|tx| ledger::insert_operation(tx, &new_operation("/ab", Some("/c")), &now))
        .expect("disjoint sibling");
}

#[test]
fn ledger_lease_claims_are_exclusive() {
    let (_temp, store) = open_store();
    let now = now_rfc3339();
    let entry = store
        .with_tx(|tx| ledger::insert_operation(tx, &new_operation("/a", Some("/b")), &now))
        .expect("insert");
    let later = rfc3339_after_secs(60);

    store
        .with_conn(|conn| {
            let claim = |owner: &str| {
                ledger::claim_lease(conn, &entry.id, owner, &now_rfc3339(), &later)
            };
            assert!(claim("instance-a")?);
            assert!(!claim("instance-b")?);
            ledger::set_lease(conn, &entry.id, &now)?;
            assert!(claim("instance-b")?);
            let claimed = ledger::operation_by_id(conn, &entry.id)?.expect("entry");
            assert_eq!(claimed.locked_by.as_deref(), Some("instance-b"));
            Ok(())
        })
        .expect("claims");
}

#[test]
fn foreign_leases_expire_but_own_leases_and_backoffs_stay() {
    let (_temp, store) = open_store();
    let now = now_rfc3339();
    let later = rfc3339_after_secs(600);
    let (foreign, own, backoff) = store
        .with_tx(|tx| {
            let foreign = ledger::insert_operation(tx, &new_operation("/a", None), &now)?;
            let own = ledger::insert_operation(tx, &new_operation("/b", None), &now)?;
            let backoff = ledger::insert_operation(tx, &new_operation("/c", None), &now)?;
            Ok((foreign, own, backoff))
        })
        .expect("insert");

    store
        .with_conn(|conn| {
            let claim = |id: &str, owner: &str| {
                ledger::claim_lease(conn, id, owner, &now_rfc3339(), &later)
            };
            assert!(claim(&foreign.id, "instance-a")?);
            assert!(claim(&own.id, "instance-b")?);
            ledger::record_attempt_failure(conn, &backoff.id, 1, "timeout", false, &later, &now)?;

            assert_eq!(
                ledger::expire_foreign_leases(conn, "instance-b", &now_rfc3339())?,
                1
            );
            assert!(claim(&foreign.id, "instance-b")?);
            assert!(!claim(&own.id, "instance-c")?);
            assert!(!claim(&backoff.id, "instance-b")?);
            Ok(())
        })
        .expect("reclaim");
}

#[test]
fn ledger_transitions_are_compare_and_set() {
    let (_temp, store) = open_store();
    let now = now_rfc3339();
    let entry = store
        .with_tx(|tx| ledger::insert_operation(tx, &new_operation("/a", Some("/b")), &now))
        .expect("insert");

    store
        .with_conn(|conn| {
            ledger::transition_operation(
                conn,
                &entry.id,
                OperationState::Requested,
                OperationState::MainInProgress,
                &now,
            )?;
            let stale = ledger::transition_operation(
                conn,
                &entry.id,
                OperationState::Requested,
                OperationState::MainInProgress,
                &now,
            )
            .expect_err("stale transition");
            assert_eq!(stale.code(), "CONFLICT");

            let illegal = ledger::transition_operation(
                conn,
                &entry.id,
                OperationState::MainInProgress,
                OperationState::SubDone,
                &now,
            )
            .expect_err("illegal");
            assert_eq!(illegal.code(), "INTERNAL_ERROR");

            ledger::record_attempt_failure(conn, &entry.id, 3, "boom", true, &now, &now)?;
            let failed = ledger::operation_by_id(conn, &entry.id)?.expect("entry");
            assert_eq!(failed.state, OperationState::Failed);
            assert_eq!(failed.attempt_count, 3);
            assert_eq!(failed.last_error.as_deref(), Some("boom"));

            assert!(ledger::reopen_failed_operation(conn, &entry.id, &now)?);
            let reopened = ledger::operation_by_id(conn, &entry.id)?.expect("entry");
            assert_eq!(reopened.state, OperationState::MainDone);
            assert_eq!(reopened.attempt_count, 0);
            Ok(())
        })
        .expect("transitions");
}
