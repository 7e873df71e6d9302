use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::error::Result;
use crate::models::Revision;

use super::{placeholders, usize_to_i64_saturating};

const REVISION_COLUMNS: &str = "id, page_id, body, author, created_at";

fn revision_from_row(row: &Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        id: row.get(0)?,
        page_id: row.get(1)?,
        body: row.get(2)?,
        author: row.get(3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn insert_revision(conn: &Connection, revision: &Revision) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO revisions({REVISION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            revision.id,
            revision.page_id,
            revision.body,
            revision.author,
            revision.created_at
        ],
    )?;
    Ok(())
}

pub(crate) fn revision_by_id(conn: &Connection, id: &str) -> Result<Option<Revision>> {
    let revision = conn
        .query_row(
            &format!("SELECT {REVISION_COLUMNS} FROM revisions WHERE id = ?1"),
            params![id],
            revision_from_row,
        )
        .optional()?;
    Ok(revision)
}

pub(crate) fn latest_revision_for_page(conn: &Connection, page_id: &str) -> Result<Option<Revision>> {
    let revision = conn
        .query_row(
            &format!(
                r"
                SELECT {REVISION_COLUMNS} FROM revisions
                WHERE page_id = ?1
                ORDER BY created_at DESC, rowid DESC
                LIMIT 1
                "
            ),
            params![page_id],
            revision_from_row,
        )
        .optional()?;
    Ok(revision)
}

/// Newest first.
pub(crate) fn list_revisions(conn: &Connection, page_id: &str, limit: usize) -> Result<Vec<Revision>> {
    let mut stmt = conn.prepare(&format!(
        r"
        SELECT {REVISION_COLUMNS} FROM revisions
        WHERE page_id = ?1
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?2
        "
    ))?;
    let rows = stmt.query_map(
        params![page_id, usize_to_i64_saturating(limit)],
        revision_from_row,
    )?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn set_revision_page(conn: &Connection, revision_id: &str, page_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE revisions SET page_id = ?2 WHERE id = ?1",
        params![revision_id, page_id],
    )?;
    Ok(())
}

pub(crate) fn delete_revisions_for_pages(conn: &Connection, page_ids: &[String]) -> Result<usize> {
    if page_ids.is_empty() {
        return Ok(0);
    }
    let deleted = conn.execute(
        &format!(
            "DELETE FROM revisions WHERE page_id IN ({})",
            placeholders(1, page_ids.len())
        ),
        params_from_iter(page_ids.iter()),
    )?;
    Ok(deleted)
}

pub(crate) fn count_revisions_for_pages(conn: &Connection, page_ids: &[String]) -> Result<u64> {
    if page_ids.is_empty() {
        return Ok(0);
    }
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM revisions WHERE page_id IN ({})",
            placeholders(1, page_ids.len())
        ),
        params_from_iter(page_ids.iter()),
        |row| row.get(0),
    )?;
    Ok(u64::try_from(count).unwrap_or(0))
}
