use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::error::Result;
use crate::models::Attachment;

use super::placeholders;

const ATTACHMENT_COLUMNS: &str = "id, page_id, owner, file_name, storage_key, size, created_at";

fn attachment_from_row(row: &Row<'_>) -> rusqlite::Result<Attachment> {
    let size: i64 = row.get(5)?;
    Ok(Attachment {
        id: row.get(0)?,
        page_id: row.get(1)?,
        owner: row.get(2)?,
        file_name: row.get(3)?,
        storage_key: row.get(4)?,
        size: u64::try_from(size).unwrap_or(0),
        created_at: row.get(6)?,
    })
}

pub(crate) fn insert_attachment(conn: &Connection, attachment: &Attachment) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO attachments({ATTACHMENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
        ),
        params![
            attachment.id,
            attachment.page_id,
            attachment.owner,
            attachment.file_name,
            attachment.storage_key,
            i64::try_from(attachment.size).unwrap_or(i64::MAX),
            attachment.created_at
        ],
    )?;
    Ok(())
}

pub(crate) fn attachment_by_id(conn: &Connection, id: &str) -> Result<Option<Attachment>> {
    let attachment = conn
        .query_row(
            &format!("SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = ?1"),
            params![id],
            attachment_from_row,
        )
        .optional()?;
    Ok(attachment)
}

pub(crate) fn delete_attachment_row(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM attachments WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub(crate) fn list_attachments(conn: &Connection, page_id: &str) -> Result<Vec<Attachment>> {
    attachments_for_pages(conn, &[page_id.to_string()])
}

pub(crate) fn attachments_for_pages(conn: &Connection, page_ids: &[String]) -> Result<Vec<Attachment>> {
    if page_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE page_id IN ({}) ORDER BY created_at ASC, rowid ASC",
        placeholders(1, page_ids.len())
    ))?;
    let rows = stmt.query_map(params_from_iter(page_ids.iter()), attachment_from_row)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn delete_attachments_for_pages(conn: &Connection, page_ids: &[String]) -> Result<usize> {
    if page_ids.is_empty() {
        return Ok(0);
    }
    let deleted = conn.execute(
        &format!(
            "DELETE FROM attachments WHERE page_id IN ({})",
            placeholders(1, page_ids.len())
        ),
        params_from_iter(page_ids.iter()),
    )?;
    Ok(deleted)
}
