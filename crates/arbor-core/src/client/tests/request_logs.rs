use crate::models::RequestLogEntry;

use super::*;

fn logged(app: &Arbor, operation: &str) -> Vec<RequestLogEntry> {
    app.list_request_logs(100)
        .expect("request logs")
        .into_iter()
        .filter(|entry| entry.operation == operation)
        .collect()
}

#[test]
fn empty_log_lists_nothing() {
    let temp = tempdir().expect("tempdir");
    let app = Arbor::with_config(temp.path(), deferred_config()).expect("app new");
    assert!(app.list_request_logs(10).expect("logs").is_empty());
}

#[test]
fn successful_calls_are_logged_newest_first() {
    let (_temp, app) = open_deferred();
    let page = create(&app, "/logged");
    app.item(&page.id, &bob()).expect("read");

    let entries = app.list_request_logs(2).expect("logs");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].operation, "tree.item");
    assert_eq!(entries[1].operation, "page.create");

    let created = &logged(&app, "page.create")[0];
    assert_eq!(created.status, "ok");
    assert_eq!(created.target_path.as_deref(), Some("/logged"));
    assert!(created.error_code.is_none());
    let details = created.details.as_ref().expect("details");
    assert_eq!(details["page_id"], page.id.as_str());
    assert_eq!(details["grant"], "public");
}

#[test]
fn failures_carry_their_error_code() {
    let (_temp, app) = open_deferred();
    create(&app, "/taken");
    let _ = app.create_page("/taken", "again", &bob(), &CreatePageOptions::default());
    let _ = app.item("missing", &bob());

    let conflict = &logged(&app, "page.create")[0];
    assert_eq!(conflict.status, "error");
    assert_eq!(conflict.error_code.as_deref(), Some("CONFLICT"));
    assert!(conflict.error_message.is_some());

    let missing = &logged(&app, "tree.item")[0];
    assert_eq!(missing.error_code.as_deref(), Some("NOT_FOUND"));
}

#[test]
fn revision_conflicts_log_the_remote_revision() {
    let (_temp, app) = open_deferred();
    let page = create(&app, "/shared");
    let origin = page.revision_id.clone().expect("revision");
    let saved = app
        .update_page(&page.id, Some(&origin), "first", &alice())
        .expect("save");
    let _ = app.update_page(&page.id, Some(&origin), "stale", &bob());

    let entry = &logged(&app, "page.update")[0];
    assert_eq!(entry.error_code.as_deref(), Some("REVISION_CONFLICT"));
    let details = entry.details.as_ref().expect("conflict details");
    assert_eq!(
        details["remote_revision_id"],
        saved.revision_id.as_deref().expect("revision")
    );
    assert_eq!(details["remote_body"], "first");
}

#[test]
fn mutations_log_their_operation_id() {
    let (_temp, app) = open_deferred();
    let page = create(&app, "/a");
    let handle = app
        .delete_page(&page.id, crate::models::DeleteOptions::default(), &alice())
        .expect("delete");

    let entry = &logged(&app, "page.delete")[0];
    assert_eq!(entry.status, "ok");
    let details = entry.details.as_ref().expect("details");
    assert_eq!(details["operation_id"], handle.operation_id.as_str());
    assert_eq!(details["from_path"], "/a");
    assert_eq!(details["to_path"], "/trash/a");
}

#[test]
fn unreadable_lines_are_skipped() {
    let (temp, app) = open_deferred();
    create(&app, "/a");
    let log_path = temp.path().join("logs").join("requests.jsonl");
    let mut raw = std::fs::read_to_string(&log_path).expect("log file");
    raw.push_str("{ not json\n");
    std::fs::write(&log_path, raw).expect("corrupt log");

    let entries = app.list_request_logs(10).expect("logs");
    assert!(entries.iter().any(|entry| entry.operation == "page.create"));
}
