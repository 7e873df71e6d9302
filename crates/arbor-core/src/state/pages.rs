use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use rusqlite::types::Value;

use crate::error::{ArborError, Result};
use crate::models::{Grant, Page, PageStatus, User};
use crate::path::{ROOT_PATH, descendant_range, is_root, parent_path};

use super::{parse_column, placeholders, usize_to_i64_saturating};

pub(super) const PAGE_COLUMNS: &str = "id, path, parent_id, descendant_count, grant_level, \
     granted_user, granted_group, creator, revision_id, is_empty, wip, status, created_at, updated_at";

/// Rows counted by ancestors: published, authored, and not link-only.
pub(super) const TREE_VISIBLE_SQL: &str =
    "status = 'published' AND is_empty = 0 AND grant_level <> 'restricted'";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanOrder {
    /// Parents before children.
    Ascending,
    /// Children before parents.
    Descending,
}

pub(super) fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    let descendant_count: i64 = row.get(3)?;
    let grant: String = row.get(4)?;
    let status: String = row.get(11)?;
    Ok(Page {
        id: row.get(0)?,
        path: row.get(1)?,
        parent_id: row.get(2)?,
        descendant_count: u64::try_from(descendant_count).unwrap_or(0),
        grant: parse_column::<Grant>(4, &grant)?,
        granted_user: row.get(5)?,
        granted_group: row.get(6)?,
        creator: row.get(7)?,
        revision_id: row.get(8)?,
        is_empty: row.get::<_, i64>(9)? != 0,
        wip: row.get::<_, i64>(10)? != 0,
        status: parse_column::<PageStatus>(11, &status)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        process_data: None,
    })
}

pub(crate) fn insert_page(conn: &Connection, page: &Page) -> Result<()> {
    let inserted = conn.execute(
        &format!(
            "INSERT INTO pages({PAGE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            page.id,
            page.path,
            page.parent_id,
            i64::try_from(page.descendant_count).unwrap_or(i64::MAX),
            page.grant.as_str(),
            page.granted_user,
            page.granted_group,
            page.creator,
            page.revision_id,
            i64::from(page.is_empty),
            i64::from(page.wip),
            page.status.as_str(),
            page.created_at,
            page.updated_at,
        ],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(ArborError::Conflict(format!("page already exists: {}", page.path)))
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn page_by_id(conn: &Connection, id: &str) -> Result<Option<Page>> {
    let page = conn
        .query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?1"),
            params![id],
            page_from_row,
        )
        .optional()?;
    Ok(page)
}

pub(crate) fn page_by_path(conn: &Connection, path: &str) -> Result<Option<Page>> {
    let page = conn
        .query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE path = ?1"),
            params![path],
            page_from_row,
        )
        .optional()?;
    Ok(page)
}

pub(crate) fn pages_by_ids(conn: &Connection, ids: &[String]) -> Result<Vec<Page>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {PAGE_COLUMNS} FROM pages WHERE id IN ({}) ORDER BY path ASC",
        placeholders(1, ids.len())
    ))?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), page_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Published, non-link-only children in path order. Grant and WIP filtering
/// for a particular viewer happens in the caller.
pub(crate) fn visible_children(conn: &Connection, parent_id: &str) -> Result<Vec<Page>> {
    let mut stmt = conn.prepare(&format!(
        r"
        SELECT {PAGE_COLUMNS} FROM pages
        WHERE parent_id = ?1
          AND status = 'published'
          AND grant_level <> 'restricted'
        ORDER BY path ASC
        "
    ))?;
    let rows = stmt.query_map(params![parent_id], page_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Strict descendants of `base` by path range, `limit` at a time, resuming
/// after `cursor` when given.
pub(crate) fn descendants_batch(
    conn: &Connection,
    base: &str,
    cursor: Option<&str>,
    limit: usize,
    order: ScanOrder,
) -> Result<Vec<Page>> {
    let (lo, hi) = descendant_range(base);
    let sql = match order {
        ScanOrder::Ascending => format!(
            r"
            SELECT {PAGE_COLUMNS} FROM pages
            WHERE path >= ?1 AND path < ?2 AND path <> ?3
              AND (?4 IS NULL OR path > ?4)
            ORDER BY path ASC
            LIMIT ?5
            "
        ),
        ScanOrder::Descending => format!(
            r"
            SELECT {PAGE_COLUMNS} FROM pages
            WHERE path >= ?1 AND path < ?2 AND path <> ?3
              AND (?4 IS NULL OR path < ?4)
            ORDER BY path DESC
            LIMIT ?5
            "
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![lo, hi, base, cursor, usize_to_i64_saturating(limit)],
        page_from_row,
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn set_page_location(
    conn: &Connection,
    id: &str,
    path: &str,
    parent_id: Option<&str>,
    status: PageStatus,
    now: &str,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE pages SET path = ?2, parent_id = ?3, status = ?4, updated_at = ?5 WHERE id = ?1",
        params![id, path, parent_id, status.as_str(), now],
    );
    match updated {
        Ok(0) => Err(ArborError::NotFound(format!("page {id}"))),
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            Err(ArborError::Conflict(format!("page already exists: {path}")))
        }
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn set_page_parent(conn: &Connection, id: &str, parent_id: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE pages SET parent_id = ?2 WHERE id = ?1",
        params![id, parent_id],
    )?;
    Ok(())
}

/// Swaps the current revision pointer if it still equals `expected`.
pub(crate) fn set_page_revision(
    conn: &Connection,
    id: &str,
    revision_id: &str,
    expected: Option<&str>,
    now: &str,
) -> Result<bool> {
    let updated = conn.execute(
        r"
        UPDATE pages SET revision_id = ?2, is_empty = 0, updated_at = ?4
        WHERE id = ?1 AND revision_id IS ?3
        ",
        params![id, revision_id, expected, now],
    )?;
    Ok(updated == 1)
}

/// Gives an empty placeholder its authored attributes. The revision pointer
/// is set separately.
pub(crate) struct PlaceholderFill<'a> {
    pub grant: Grant,
    pub granted_user: Option<&'a str>,
    pub granted_group: Option<&'a str>,
    pub creator: &'a str,
    pub wip: bool,
}

pub(crate) fn fill_placeholder(
    conn: &Connection,
    id: &str,
    fill: &PlaceholderFill<'_>,
    now: &str,
) -> Result<bool> {
    let updated = conn.execute(
        r"
        UPDATE pages
        SET grant_level = ?2, granted_user = ?3, granted_group = ?4, creator = ?5, wip = ?6,
            updated_at = ?7
        WHERE id = ?1 AND is_empty = 1
        ",
        params![
            id,
            fill.grant.as_str(),
            fill.granted_user,
            fill.granted_group,
            fill.creator,
            i64::from(fill.wip),
            now
        ],
    )?;
    Ok(updated == 1)
}

/// Turns an authored page into a content-less placeholder.
pub(crate) fn make_placeholder(conn: &Connection, id: &str, now: &str) -> Result<()> {
    conn.execute(
        r"
        UPDATE pages
        SET is_empty = 1, revision_id = NULL, grant_level = 'public', granted_user = NULL,
            granted_group = NULL, wip = 0, updated_at = ?2
        WHERE id = ?1
        ",
        params![id, now],
    )?;
    Ok(())
}

pub(crate) fn delete_page_row(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM pages WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub(crate) fn has_children(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM pages WHERE parent_id = ?1 LIMIT 1",
            params![id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(found)
}

/// Re-parents every child of `from_parent` onto `to_parent`.
pub(crate) fn unlink_children(
    conn: &Connection,
    from_parent: &str,
    to_parent: Option<&str>,
) -> Result<usize> {
    let moved = conn.execute(
        "UPDATE pages SET parent_id = ?2 WHERE parent_id = ?1",
        params![from_parent, to_parent],
    )?;
    Ok(moved)
}

/// Returns the id of `path`'s parent, creating empty placeholders for any
/// missing ancestors. The root must already exist.
pub(crate) fn ensure_parent(conn: &Connection, path: &str, now: &str) -> Result<String> {
    let Some(parent) = parent_path(path) else {
        return Err(ArborError::InvalidPath("the root page has no parent".to_string()));
    };
    if let Some(page) = page_by_path(conn, parent)? {
        return Ok(page.id);
    }
    if is_root(parent) {
        return Err(ArborError::NotFound(format!(
            "root page {ROOT_PATH}; initialize the tree first"
        )));
    }
    let grandparent_id = ensure_parent(conn, parent, now)?;
    let placeholder = Page {
        id: uuid::Uuid::new_v4().to_string(),
        path: parent.to_string(),
        parent_id: Some(grandparent_id),
        descendant_count: 0,
        grant: Grant::Public,
        granted_user: None,
        granted_group: None,
        creator: None,
        revision_id: None,
        is_empty: true,
        wip: false,
        status: PageStatus::Published,
        created_at: now.to_string(),
        updated_at: now.to_string(),
        process_data: None,
    };
    insert_page(conn, &placeholder)?;
    Ok(placeholder.id)
}

/// Deletes childless empty placeholders starting at `path` and walking up.
/// Returns how many were removed.
pub(crate) fn prune_empty_leaves(conn: &Connection, path: &str) -> Result<usize> {
    let mut removed = 0usize;
    let mut current = path.to_string();
    loop {
        if is_root(&current) {
            break;
        }
        let Some(page) = page_by_path(conn, &current)? else {
            match parent_path(&current) {
                Some(parent) => {
                    current = parent.to_string();
                    continue;
                }
                None => break,
            }
        };
        if !page.is_empty || page.is_trashed() || has_children(conn, &page.id)? {
            break;
        }
        delete_page_row(conn, &page.id)?;
        removed += 1;
        match parent_path(&current) {
            Some(parent) => current = parent.to_string(),
            None => break,
        }
    }
    Ok(removed)
}

/// Pages in `base`'s subtree (inclusive) that `user` cannot open.
pub(crate) fn count_unviewable_in_subtree(conn: &Connection, base: &str, user: &User) -> Result<u64> {
    if user.is_admin {
        return Ok(0);
    }
    let (lo, hi) = descendant_range(base);
    let mut values: Vec<Value> = vec![
        Value::from(base.to_string()),
        Value::from(lo),
        Value::from(hi),
        Value::from(user.id.clone()),
    ];
    let group_clause = if user.group_ids.is_empty() {
        "0".to_string()
    } else {
        let clause = format!("granted_group IN ({})", placeholders(5, user.group_ids.len()));
        values.extend(user.group_ids.iter().cloned().map(Value::from));
        clause
    };
    let sql = format!(
        r"
        SELECT COUNT(*) FROM pages
        WHERE (path = ?1 OR (path >= ?2 AND path < ?3 AND path <> ?1))
          AND NOT (
            grant_level IN ('public', 'restricted')
            OR (grant_level = 'owner' AND ?4 <> '' AND granted_user = ?4)
            OR (grant_level = 'user_group' AND {group_clause})
          )
        "
    );
    let count: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Tree-visible pages in `base`'s subtree, `base` included.
pub(crate) fn count_tree_visible_in_subtree(conn: &Connection, base: &str) -> Result<u64> {
    let (lo, hi) = descendant_range(base);
    let count: i64 = conn.query_row(
        &format!(
            r"
            SELECT COUNT(*) FROM pages
            WHERE (path = ?1 OR (path >= ?2 AND path < ?3))
              AND {TREE_VISIBLE_SQL}
            "
        ),
        params![base, lo, hi],
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// First existing authored page that moving `from`'s descendants under `to`
/// would land on.
pub(crate) fn first_subtree_collision(conn: &Connection, from: &str, to: &str) -> Result<Option<String>> {
    let (lo, hi) = descendant_range(from);
    let suffix_start = i64::try_from(from.chars().count() + 1).unwrap_or(i64::MAX);
    let collision = conn
        .query_row(
            r"
            SELECT d.path FROM pages AS s
            JOIN pages AS d ON d.path = ?3 || substr(s.path, ?4)
            WHERE s.path >= ?1 AND s.path < ?2
              AND d.is_empty = 0
            ORDER BY d.path ASC
            LIMIT 1
            ",
            params![lo, hi, to, suffix_start],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(collision)
}

/// Whether any page exists at `base` or below it.
pub(crate) fn subtree_occupied(conn: &Connection, base: &str) -> Result<bool> {
    let (lo, hi) = descendant_range(base);
    let found = conn
        .query_row(
            "SELECT 1 FROM pages WHERE path = ?1 OR (path >= ?2 AND path < ?3) LIMIT 1",
            params![base, lo, hi],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(found)
}
