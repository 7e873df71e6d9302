//! `page_operations`: one row per structural mutation attempt.
//!
//! A row is both the subtree lock and the resumption record. Overlap checks
//! and inserts run inside the caller's transaction so two writers cannot
//! both see a free subtree.

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::error::{ArborError, Result};
use crate::models::{
    ActionStage, ActionType, NewOperation, OperationEntry, OperationOptions, OperationState,
    PageSnapshot, User,
};
use crate::path::{ancestor_paths, descendant_range};

use super::{json_column, parse_column, placeholders};

const OPERATION_COLUMNS: &str = "id, action_type, action_stage, state, page_snapshot_json, \
     from_path, to_path, options_json, user_json, attempt_count, last_error, progress_cursor, \
     locked_until, created_at, updated_at, locked_by";

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<OperationEntry> {
    let action_type: String = row.get(1)?;
    let action_stage: String = row.get(2)?;
    let state: String = row.get(3)?;
    let snapshot: String = row.get(4)?;
    let options: String = row.get(7)?;
    let user: String = row.get(8)?;
    let attempt_count: i64 = row.get(9)?;
    Ok(OperationEntry {
        id: row.get(0)?,
        action_type: parse_column::<ActionType>(1, &action_type)?,
        action_stage: parse_column::<ActionStage>(2, &action_stage)?,
        state: parse_column::<OperationState>(3, &state)?,
        page: json_column::<PageSnapshot>(4, &snapshot)?,
        from_path: row.get(5)?,
        to_path: row.get(6)?,
        options: json_column::<OperationOptions>(7, &options)?,
        user: json_column::<User>(8, &user)?,
        attempt_count: u32::try_from(attempt_count).unwrap_or(u32::MAX),
        last_error: row.get(10)?,
        progress_cursor: row.get(11)?,
        locked_until: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        locked_by: row.get(15)?,
    })
}

/// Records a new `Requested` entry unless another entry already covers an
/// overlapping subtree.
pub(crate) fn insert_operation(
    conn: &Connection,
    new: &NewOperation,
    now: &str,
) -> Result<OperationEntry> {
    let mut paths = vec![new.from_path.as_str()];
    if let Some(to_path) = new.to_path.as_deref() {
        paths.push(to_path);
    }
    for path in paths {
        if let Some(existing) = find_overlapping_operation(conn, path)? {
            return Err(ArborError::Conflict(format!(
                "{path} overlaps pending {} operation {} on {}",
                existing.action_type, existing.id, existing.from_path
            )));
        }
    }

    let entry = OperationEntry {
        id: uuid::Uuid::new_v4().to_string(),
        action_type: new.action_type,
        action_stage: ActionStage::Main,
        state: OperationState::Requested,
        page: new.page.clone(),
        from_path: new.from_path.clone(),
        to_path: new.to_path.clone(),
        options: new.options.clone(),
        user: new.user.clone(),
        attempt_count: 0,
        last_error: None,
        progress_cursor: None,
        locked_until: new.lease_until.clone(),
        locked_by: Some(new.lease_owner.clone()),
        created_at: now.to_string(),
        updated_at: now.to_string(),
    };
    conn.execute(
        r"
        INSERT INTO page_operations(
            id, action_type, action_stage, state, page_id, page_snapshot_json, from_path,
            to_path, options_json, user_json, attempt_count, locked_until, locked_by,
            created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?12, ?13, ?13)
        ",
        params![
            entry.id,
            entry.action_type.as_str(),
            entry.action_stage.as_str(),
            entry.state.as_str(),
            entry.page.page_id,
            serde_json::to_string(&entry.page)?,
            entry.from_path,
            entry.to_path,
            serde_json::to_string(&entry.options)?,
            serde_json::to_string(&entry.user)?,
            entry.locked_until,
            entry.locked_by,
            now,
        ],
    )?;
    Ok(entry)
}

/// Any entry whose from/to path equals `path`, is one of its ancestors, or
/// lies beneath it.
pub(crate) fn find_overlapping_operation(
    conn: &Connection,
    path: &str,
) -> Result<Option<OperationEntry>> {
    let (lo, hi) = descendant_range(path);
    let mut lineage = ancestor_paths(path);
    lineage.push(path.to_string());

    let mut values: Vec<Value> = vec![Value::from(lo), Value::from(hi)];
    let in_list = placeholders(3, lineage.len());
    values.extend(lineage.into_iter().map(Value::from));
    let sql = format!(
        r"
        SELECT {OPERATION_COLUMNS} FROM page_operations
        WHERE from_path IN ({in_list}) OR (from_path >= ?1 AND from_path < ?2)
           OR to_path IN ({in_list}) OR (to_path >= ?1 AND to_path < ?2)
        ORDER BY created_at ASC, rowid ASC
        LIMIT 1
        "
    );
    let entry = conn
        .query_row(&sql, params_from_iter(values.iter()), operation_from_row)
        .optional()?;
    Ok(entry)
}

/// Entry whose from/to subtree contains `path`.
pub(crate) fn find_covering_operation(
    conn: &Connection,
    path: &str,
) -> Result<Option<OperationEntry>> {
    let mut lineage = ancestor_paths(path);
    lineage.push(path.to_string());
    let in_list = placeholders(1, lineage.len());
    let sql = format!(
        r"
        SELECT {OPERATION_COLUMNS} FROM page_operations
        WHERE from_path IN ({in_list}) OR to_path IN ({in_list})
        ORDER BY created_at ASC, rowid ASC
        LIMIT 1
        "
    );
    let entry = conn
        .query_row(&sql, params_from_iter(lineage.iter()), operation_from_row)
        .optional()?;
    Ok(entry)
}

pub(crate) fn operation_by_id(conn: &Connection, id: &str) -> Result<Option<OperationEntry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {OPERATION_COLUMNS} FROM page_operations WHERE id = ?1"),
            params![id],
            operation_from_row,
        )
        .optional()?;
    Ok(entry)
}

/// Oldest first.
pub(crate) fn list_operations(conn: &Connection) -> Result<Vec<OperationEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {OPERATION_COLUMNS} FROM page_operations ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt.query_map([], operation_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn operations_for_pages(
    conn: &Connection,
    page_ids: &[String],
) -> Result<Vec<OperationEntry>> {
    if page_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {OPERATION_COLUMNS} FROM page_operations WHERE page_id IN ({}) ORDER BY created_at ASC",
        placeholders(1, page_ids.len())
    ))?;
    let rows = stmt.query_map(params_from_iter(page_ids.iter()), operation_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Compare-and-set state change. Fails with `Conflict` when another worker
/// moved the entry first.
pub(crate) fn transition_operation(
    conn: &Connection,
    id: &str,
    from: OperationState,
    to: OperationState,
    now: &str,
) -> Result<()> {
    if !from.can_transition_to(to) {
        return Err(ArborError::Internal(format!(
            "illegal operation transition {from} -> {to} for {id}"
        )));
    }
    let updated = conn.execute(
        r"
        UPDATE page_operations
        SET state = ?3, action_stage = ?4, updated_at = ?5
        WHERE id = ?1 AND state = ?2
        ",
        params![id, from.as_str(), to.as_str(), to.stage().as_str(), now],
    )?;
    if updated == 0 {
        return Err(ArborError::Conflict(format!(
            "operation {id} is no longer {from}"
        )));
    }
    Ok(())
}

/// Takes the entry's lease for `owner` if the previous one expired. Failed
/// entries are never claimed.
pub(crate) fn claim_lease(
    conn: &Connection,
    id: &str,
    owner: &str,
    now: &str,
    until: &str,
) -> Result<bool> {
    let updated = conn.execute(
        r"
        UPDATE page_operations
        SET locked_until = ?4, locked_by = ?2, updated_at = ?3
        WHERE id = ?1 AND locked_until <= ?3 AND state <> 'failed'
        ",
        params![id, owner, now, until],
    )?;
    Ok(updated == 1)
}

/// Expires every live lease taken by an instance other than `owner`.
/// Retry backoffs carry no owner and are left alone.
pub(crate) fn expire_foreign_leases(conn: &Connection, owner: &str, now: &str) -> Result<usize> {
    let updated = conn.execute(
        r"
        UPDATE page_operations
        SET locked_until = ?2, updated_at = ?2
        WHERE locked_by IS NOT NULL AND locked_by <> ?1
          AND locked_until > ?2 AND state <> 'failed'
        ",
        params![owner, now],
    )?;
    Ok(updated)
}

pub(crate) fn set_lease(conn: &Connection, id: &str, until: &str) -> Result<()> {
    conn.execute(
        "UPDATE page_operations SET locked_until = ?2 WHERE id = ?1",
        params![id, until],
    )?;
    Ok(())
}

pub(crate) fn set_progress_cursor(
    conn: &Connection,
    id: &str,
    cursor: Option<&str>,
    now: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE page_operations SET progress_cursor = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, cursor, now],
    )?;
    Ok(())
}

/// Stores a Sub-stage failure. `failed` flips the entry to its terminal
/// state; otherwise `retry_at` becomes the new lease expiry.
pub(crate) fn record_attempt_failure(
    conn: &Connection,
    id: &str,
    attempt: u32,
    error: &str,
    failed: bool,
    retry_at: &str,
    now: &str,
) -> Result<()> {
    conn.execute(
        r"
        UPDATE page_operations
        SET attempt_count = ?2,
            last_error = ?3,
            state = CASE WHEN ?4 THEN 'failed' ELSE state END,
            action_stage = 'sub',
            locked_until = ?5,
            locked_by = NULL,
            updated_at = ?6
        WHERE id = ?1
        ",
        params![id, i64::from(attempt), error, failed, retry_at, now],
    )?;
    Ok(())
}

/// Puts a `Failed` entry back to `MainDone` with a fresh attempt budget.
pub(crate) fn reopen_failed_operation(conn: &Connection, id: &str, now: &str) -> Result<bool> {
    let updated = conn.execute(
        r"
        UPDATE page_operations
        SET state = 'main_done', action_stage = 'sub', attempt_count = 0, last_error = NULL,
            locked_until = ?2, locked_by = NULL, updated_at = ?2
        WHERE id = ?1 AND state = 'failed'
        ",
        params![id, now],
    )?;
    Ok(updated == 1)
}

pub(crate) fn delete_operation(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM page_operations WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}
