use std::fs;
use std::sync::Mutex;

use crate::models::{
    ActionType, DuplicateOptions, NewOperation, OperationOptions, OperationState, RenameOptions,
    ResumeReport, SubStageBudget, SubStageOutcome,
};
use crate::state::{ledger, now_rfc3339, rfc3339_after_secs};

use super::*;

fn rename(app: &Arbor, from: &str, to: &str) -> String {
    let page = page_at(app, from).unwrap_or_else(|| panic!("{from} should exist"));
    app.rename_page(
        &page.id,
        &RenameOptions {
            new_path: to.to_string(),
        },
        &alice(),
    )
    .expect("rename")
    .operation_id
}

fn insert_uncommitted(app: &Arbor, path: &str, lease_until: String) -> String {
    let page = page_at(app, path).unwrap_or_else(|| panic!("{path} should exist"));
    app.state
        .with_tx(|tx| {
            ledger::insert_operation(
                tx,
                &NewOperation {
                    action_type: ActionType::Rename,
                    page: page.snapshot(),
                    from_path: page.path.clone(),
                    to_path: Some(format!("{path}-moved")),
                    options: OperationOptions::default(),
                    user: alice(),
                    lease_until,
                    lease_owner: app.instance_id().to_string(),
                },
                &now_rfc3339(),
            )
        })
        .expect("insert entry")
        .id
}

/// Duplicate of `/src` whose attachment copies fail until the uploader is
/// switched back.
fn failing_duplicate(max_attempts: u32) -> (TempDir, Arbor, Arc<FlakyUploader>, String) {
    let temp = tempdir().expect("tempdir");
    let uploader = FlakyUploader::new(&temp);
    let mut config = deferred_config();
    config.operations.max_attempts = max_attempts;
    let app = Arbor::with_config(temp.path(), config)
        .expect("app new")
        .with_uploader(uploader.clone());
    app.initialize().expect("init failed");

    create(&app, "/src");
    let child = create(&app, "/src/child");
    app.attach_file(&child.id, "notes.txt", b"notes", &alice())
        .expect("attach");
    uploader.set_failing(true);

    let operation_id = app
        .duplicate_page(
            &page_at(&app, "/src").expect("src").id,
            &DuplicateOptions::new("/dup"),
            &alice(),
        )
        .expect("duplicate main stage")
        .operation_id;
    (temp, app, uploader, operation_id)
}

#[test]
fn interrupted_rename_is_finished_by_the_startup_sweep() {
    let temp = tempdir().expect("tempdir");
    {
        let app = Arbor::with_config(temp.path(), deferred_config()).expect("app new");
        app.initialize().expect("init failed");
        create(&app, "/a");
        create(&app, "/a/x");
        create(&app, "/a/y");
        let operation_id = rename(&app, "/a", "/b");

        let outcome = app
            .process_operation(&operation_id, SubStageBudget::Pages(1))
            .expect("partial run");
        assert_eq!(outcome, SubStageOutcome::Interrupted { processed: 1 });
        let entry = app
            .operation(&operation_id)
            .expect("lookup")
            .expect("still pending");
        assert_eq!(entry.state, OperationState::SubInProgress);
    }

    let app = Arbor::with_config(temp.path(), deferred_config()).expect("reopen");
    app.initialize().expect("init after restart");
    let report = app.resume_pending_operations().expect("resume");
    assert_eq!(
        report,
        ResumeReport {
            scanned: 1,
            completed: 1,
            ..ResumeReport::default()
        }
    );

    for path in ["/b", "/b/x", "/b/y"] {
        assert!(page_at(&app, path).is_some(), "{path} missing");
    }
    for path in ["/a", "/a/x", "/a/y"] {
        assert!(page_at(&app, path).is_none(), "{path} left behind");
    }
    assert_eq!(count_at(&app, "/"), 3);
    assert_eq!(count_at(&app, "/b"), 2);
    assert!(app.list_operations().expect("ledger").is_empty());
}

#[test]
fn second_sweep_finds_nothing_to_do() {
    let (_temp, app) = open_deferred();
    create(&app, "/a");
    create(&app, "/a/x");
    rename(&app, "/a", "/b");

    let first = app.resume_pending_operations().expect("first sweep");
    assert_eq!(first.completed, 1);
    let before = child_paths(&app, "/b", &alice());

    let second = app.resume_pending_operations().expect("second sweep");
    assert_eq!(second, ResumeReport::default());
    assert_eq!(child_paths(&app, "/b", &alice()), before);
    assert_eq!(count_at(&app, "/"), 2);
}

/// Leaves `operation_id` the way a worker does right after claiming it for
/// its Sub stage.
fn claim_for_sub_stage(app: &Arbor, operation_id: &str) {
    app.state
        .with_tx(|tx| {
            assert!(ledger::claim_lease(
                tx,
                operation_id,
                app.instance_id(),
                &now_rfc3339(),
                &rfc3339_after_secs(600),
            )?);
            ledger::transition_operation(
                tx,
                operation_id,
                OperationState::MainDone,
                OperationState::SubInProgress,
                &now_rfc3339(),
            )
        })
        .expect("claim sub stage");
}

#[test]
fn sub_stage_held_by_a_crashed_instance_is_finished_at_startup() {
    let temp = tempdir().expect("tempdir");
    let operation_id = {
        let app = Arbor::with_config(temp.path(), deferred_config()).expect("app new");
        app.initialize().expect("init failed");
        create(&app, "/a");
        create(&app, "/a/x");
        let operation_id = rename(&app, "/a", "/b");
        claim_for_sub_stage(&app, &operation_id);
        operation_id
    };

    let app = Arbor::with_config(temp.path(), deferred_config()).expect("reopen");
    app.initialize().expect("init after restart");
    let report = app.resume_pending_operations().expect("resume");
    assert_eq!(
        report,
        ResumeReport {
            reclaimed: 1,
            scanned: 1,
            completed: 1,
            ..ResumeReport::default()
        }
    );
    assert!(page_at(&app, "/b/x").is_some());
    assert!(page_at(&app, "/a/x").is_none());
    assert!(app.operation(&operation_id).expect("lookup").is_none());

    let again = app.resume_pending_operations().expect("second sweep");
    assert_eq!(again, ResumeReport::default());
}

#[test]
fn live_instance_keeps_its_own_lease() {
    let (_temp, app) = open_deferred();
    create(&app, "/a");
    create(&app, "/a/x");
    let operation_id = rename(&app, "/a", "/b");
    claim_for_sub_stage(&app, &operation_id);

    let report = app.resume_pending_operations().expect("resume");
    assert_eq!(report.reclaimed, 0);
    assert_eq!(report.busy, 1);
    assert!(page_at(&app, "/a/x").is_some());
    let entry = app
        .operation(&operation_id)
        .expect("lookup")
        .expect("still pending");
    assert_eq!(entry.locked_by.as_deref(), Some(app.instance_id()));
}

#[test]
fn uncommitted_entry_of_a_crashed_instance_is_discarded_at_startup() {
    let temp = tempdir().expect("tempdir");
    {
        let app = Arbor::with_config(temp.path(), deferred_config()).expect("app new");
        app.initialize().expect("init failed");
        create(&app, "/held");
        insert_uncommitted(&app, "/held", rfc3339_after_secs(600));
    }

    let app = Arbor::with_config(temp.path(), deferred_config()).expect("reopen");
    let report = app.resume_pending_operations().expect("resume");
    assert_eq!(report.reclaimed, 1);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.busy, 0);
    assert!(app.list_operations().expect("ledger").is_empty());
}

/// Local uploader that hands the operation lease to another instance while
/// the first copy is in flight, the way a sweep in a second process would
/// after deciding the first one died.
struct LeaseTakeoverUploader {
    inner: LocalUploader,
    takeover: Mutex<Option<(Arbor, String)>>,
}

impl Uploader for LeaseTakeoverUploader {
    fn kind(&self) -> UploaderKind {
        UploaderKind::Local
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.inner.save(key, bytes)
    }

    fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        let takeover = self.takeover.lock().expect("takeover lock").take();
        if let Some((other, operation_id)) = takeover {
            other.state.with_tx(|tx| {
                let now = now_rfc3339();
                ledger::expire_foreign_leases(tx, other.instance_id(), &now)?;
                assert!(ledger::claim_lease(
                    tx,
                    &operation_id,
                    other.instance_id(),
                    &now,
                    &now
                )?);
                Ok(())
            })?;
        }
        self.inner.copy(from_key, to_key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }
}

#[test]
fn worker_that_lost_its_lease_stops_and_the_new_owner_finishes() {
    let temp = tempdir().expect("tempdir");
    let uploader = Arc::new(LeaseTakeoverUploader {
        inner: LocalUploader::new(temp.path().join("uploads")),
        takeover: Mutex::new(None),
    });
    let first = Arbor::with_config(temp.path(), deferred_config())
        .expect("app new")
        .with_uploader(uploader.clone());
    first.initialize().expect("init failed");
    create(&first, "/src");
    let child = create(&first, "/src/child");
    first
        .attach_file(&child.id, "notes.txt", b"notes", &alice())
        .expect("attach");
    let operation_id = first
        .duplicate_page(
            &page_at(&first, "/src").expect("src").id,
            &DuplicateOptions::new("/dup"),
            &alice(),
        )
        .expect("duplicate main stage")
        .operation_id;

    let second = Arbor::with_config(temp.path(), deferred_config()).expect("second instance");
    *uploader.takeover.lock().expect("takeover lock") = Some((second.clone(), operation_id.clone()));

    let outcome = first
        .process_operation(&operation_id, SubStageBudget::Unbounded)
        .expect("first worker");
    assert_eq!(outcome, SubStageOutcome::Busy);
    assert!(page_at(&first, "/dup/child").is_none());
    let entry = first
        .operation(&operation_id)
        .expect("lookup")
        .expect("still pending");
    assert_eq!(entry.locked_by.as_deref(), Some(second.instance_id()));

    let outcome = second
        .process_operation(&operation_id, SubStageBudget::Unbounded)
        .expect("second worker");
    assert_eq!(outcome, SubStageOutcome::Completed { processed: 1 });
    let copy = page_at(&second, "/dup/child").expect("copied child");
    let copied = second
        .list_attachments(&copy.id, &alice())
        .expect("attachments");
    assert_eq!(copied.len(), 1);
    assert!(temp.path().join("uploads").join(&copied[0].storage_key).exists());
}

#[test]
fn duplicate_skips_an_attachment_whose_object_vanished() {
    let (temp, app) = open_deferred();
    create(&app, "/src");
    let child = create(&app, "/src/child");
    let lost = app
        .attach_file(&child.id, "lost.txt", b"lost", &alice())
        .expect("attach lost");
    app.attach_file(&child.id, "kept.txt", b"kept", &alice())
        .expect("attach kept");
    let operation_id = app
        .duplicate_page(
            &page_at(&app, "/src").expect("src").id,
            &DuplicateOptions::new("/dup"),
            &alice(),
        )
        .expect("duplicate main stage")
        .operation_id;

    fs::remove_file(temp.path().join("uploads").join(&lost.storage_key)).expect("drop object");

    let outcome = app
        .process_operation(&operation_id, SubStageBudget::Unbounded)
        .expect("process");
    assert_eq!(outcome, SubStageOutcome::Completed { processed: 1 });
    let copy = page_at(&app, "/dup/child").expect("copied child");
    let copied = app.list_attachments(&copy.id, &alice()).expect("attachments");
    assert_eq!(copied.len(), 1);
    assert_eq!(copied[0].file_name, "kept.txt");
    assert!(temp.path().join("uploads").join(&copied[0].storage_key).exists());
    assert!(app.list_operations().expect("ledger").is_empty());
}

/// Local uploader that counts copies made while another connection could
/// not take the database write lock.
struct LockCheckingUploader {
    inner: LocalUploader,
    database: std::path::PathBuf,
    copies: AtomicUsize,
    copies_under_lock: AtomicUsize,
}

impl Uploader for LockCheckingUploader {
    fn kind(&self) -> UploaderKind {
        UploaderKind::Local
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.inner.save(key, bytes)
    }

    fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        let conn = rusqlite::Connection::open(&self.database)?;
        conn.busy_timeout(std::time::Duration::ZERO)?;
        if conn.execute_batch("BEGIN IMMEDIATE; ROLLBACK;").is_err() {
            self.copies_under_lock.fetch_add(1, Ordering::SeqCst);
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(from_key, to_key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }
}

#[test]
fn attachment_copies_run_outside_the_write_transaction() {
    let temp = tempdir().expect("tempdir");
    let uploader = Arc::new(LockCheckingUploader {
        inner: LocalUploader::new(temp.path().join("uploads")),
        database: temp.path().join(super::super::STATE_FILE_NAME),
        copies: AtomicUsize::new(0),
        copies_under_lock: AtomicUsize::new(0),
    });
    let app = Arbor::with_config(temp.path(), deferred_config())
        .expect("app new")
        .with_uploader(uploader.clone());
    app.initialize().expect("init failed");
    let src = create(&app, "/src");
    let child = create(&app, "/src/child");
    app.attach_file(&src.id, "root.txt", b"root", &alice())
        .expect("attach root");
    app.attach_file(&child.id, "child.txt", b"child", &alice())
        .expect("attach child");

    let operation_id = app
        .duplicate_page(&src.id, &DuplicateOptions::new("/dup"), &alice())
        .expect("duplicate main stage")
        .operation_id;
    let outcome = app
        .process_operation(&operation_id, SubStageBudget::Unbounded)
        .expect("process");
    assert_eq!(outcome, SubStageOutcome::Completed { processed: 1 });

    assert_eq!(uploader.copies.load(Ordering::SeqCst), 2);
    assert_eq!(uploader.copies_under_lock.load(Ordering::SeqCst), 0);
}

#[test]
fn uncommitted_entries_are_discarded_unless_leased() {
    let (_temp, app) = open_deferred();
    create(&app, "/stale");
    create(&app, "/held");
    insert_uncommitted(&app, "/stale", now_rfc3339());
    let held = insert_uncommitted(&app, "/held", rfc3339_after_secs(600));

    let report = app.resume_pending_operations().expect("resume");
    assert_eq!(report.scanned, 2);
    assert_eq!(report.discarded, 1);
    assert_eq!(report.busy, 1);

    let remaining = app.list_operations().expect("ledger");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, held);
    assert!(page_at(&app, "/stale").is_some());
    assert!(page_at(&app, "/stale-moved").is_none());

    let skipped = app
        .list_request_logs(20)
        .expect("logs")
        .into_iter()
        .find(|entry| entry.status == "skipped")
        .expect("skip logged");
    assert_eq!(skipped.target_path.as_deref(), Some("/stale"));
}

#[test]
fn processing_an_uncommitted_entry_is_a_conflict() {
    let (_temp, app) = open_deferred();
    create(&app, "/a");
    let id = insert_uncommitted(&app, "/a", now_rfc3339());
    let err = app
        .process_operation(&id, SubStageBudget::Unbounded)
        .expect_err("main stage not committed");
    assert!(matches!(err, ArborError::Conflict(_)));
}

#[test]
fn exhausted_transient_failures_wait_for_an_explicit_retry() {
    let (_temp, app, uploader, operation_id) = failing_duplicate(1);

    let outcome = app
        .process_operation(&operation_id, SubStageBudget::Unbounded)
        .expect("process");
    assert!(
        matches!(&outcome, SubStageOutcome::Failed { error } if error.contains("timed out")),
        "unexpected outcome {outcome:?}"
    );
    let entry = app
        .operation(&operation_id)
        .expect("lookup")
        .expect("failed entry kept");
    assert_eq!(entry.state, OperationState::Failed);
    assert_eq!(entry.attempt_count, 1);
    assert!(page_at(&app, "/dup/child").is_none());

    let report = app.resume_pending_operations().expect("resume");
    assert_eq!(report.scanned, 1);
    assert_eq!(report.failed, 1);

    let err = app
        .create_page("/dup/extra", "body", &alice(), &CreatePageOptions::default())
        .expect_err("subtree still locked");
    assert!(matches!(err, ArborError::Conflict(_)));

    uploader.set_failing(false);
    let outcome = app.retry_operation(&operation_id).expect("retry");
    assert_eq!(outcome, SubStageOutcome::Completed { processed: 1 });
    assert_eq!(uploader.copies.load(Ordering::SeqCst), 1);

    let copy = page_at(&app, "/dup/child").expect("copied child");
    assert_eq!(
        app.list_attachments(&copy.id, &alice()).expect("attachments").len(),
        1
    );
    assert_eq!(count_at(&app, "/dup"), 1);
    assert!(app.operation(&operation_id).expect("lookup").is_none());
}

#[test]
fn transient_failure_under_the_cap_schedules_a_retry() {
    let (_temp, app, _uploader, operation_id) = failing_duplicate(3);

    let outcome = app
        .process_operation(&operation_id, SubStageBudget::Unbounded)
        .expect("process");
    let next_attempt_at = match outcome {
        SubStageOutcome::Retrying {
            attempt,
            next_attempt_at,
        } => {
            assert_eq!(attempt, 1);
            next_attempt_at
        }
        other => panic!("expected retry, got {other:?}"),
    };

    let entry = app
        .operation(&operation_id)
        .expect("lookup")
        .expect("pending entry");
    assert_eq!(entry.state, OperationState::SubInProgress);
    assert_eq!(entry.locked_until, next_attempt_at);
    assert!(entry.last_error.is_some());

    let outcome = app
        .process_operation(&operation_id, SubStageBudget::Unbounded)
        .expect("process again");
    assert_eq!(outcome, SubStageOutcome::Busy);
}

#[test]
fn retry_requires_a_failed_entry() {
    let (_temp, app) = open_deferred();
    create(&app, "/a");
    let operation_id = rename(&app, "/a", "/b");

    let err = app
        .retry_operation(&operation_id)
        .expect_err("not failed");
    assert!(matches!(err, ArborError::Conflict(_)));

    let err = app.retry_operation("missing").expect_err("missing");
    assert!(matches!(err, ArborError::NotFound(_)));

    let err = app
        .process_operation("missing", SubStageBudget::Unbounded)
        .expect_err("missing");
    assert!(matches!(err, ArborError::NotFound(_)));
}
