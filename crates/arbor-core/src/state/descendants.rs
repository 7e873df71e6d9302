//! Cached `descendant_count` upkeep.
//!
//! `adjust_descendant_count` applies a delta along an ancestor chain in one
//! statement. The recount helpers derive the value from the rows themselves
//! and may run any number of times with the same result.

use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use crate::error::{ArborError, Result};
use crate::path::{ancestor_paths, descendant_range};

use super::pages::page_by_id;
use super::placeholders;

/// Same predicate as the tree-visibility filter, against the `d` alias.
const COUNTED_SQL: &str =
    "d.status = 'published' AND d.is_empty = 0 AND d.grant_level <> 'restricted'";

pub(crate) fn adjust_descendant_count(
    conn: &Connection,
    page_id: &str,
    delta: i64,
    include_target: bool,
) -> Result<usize> {
    if delta == 0 {
        return Ok(0);
    }
    let page = page_by_id(conn, page_id)?
        .ok_or_else(|| ArborError::NotFound(format!("page {page_id}")))?;
    let mut targets = ancestor_paths(&page.path);
    if include_target {
        targets.insert(0, page.path.clone());
    }
    if targets.is_empty() {
        return Ok(0);
    }

    let mut values: Vec<Value> = vec![
        Value::from(delta),
        Value::from(page.status.as_str().to_string()),
    ];
    values.extend(targets.into_iter().map(Value::from));
    let sql = format!(
        r"
        UPDATE pages
        SET descendant_count = MAX(descendant_count + ?1, 0)
        WHERE status = ?2 AND path IN ({})
        ",
        placeholders(3, values.len() - 2)
    );
    let updated = conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(updated)
}

/// Recomputes each listed page's count from its current subtree.
pub(crate) fn recount_descendants(conn: &Connection, paths: &[String]) -> Result<usize> {
    let mut stmt = conn.prepare(&format!(
        r"
        UPDATE pages
        SET descendant_count = (
            SELECT COUNT(*) FROM pages AS d
            WHERE d.path >= ?2 AND d.path < ?3 AND d.path <> ?1
              AND {COUNTED_SQL}
        )
        WHERE path = ?1
        "
    ))?;
    let mut updated = 0usize;
    for path in paths {
        let (lo, hi) = descendant_range(path);
        updated += stmt.execute(params![path, lo, hi])?;
    }
    Ok(updated)
}

/// Recomputes the count of `base` and every page below it in one pass.
pub(crate) fn recount_subtree(conn: &Connection, base: &str) -> Result<usize> {
    let (lo, hi) = descendant_range(base);
    let updated = conn.execute(
        &format!(
            r"
            UPDATE pages
            SET descendant_count = (
                SELECT COUNT(*) FROM pages AS d
                WHERE d.path >= CASE WHEN pages.path = '/' THEN '/' ELSE pages.path || '/' END
                  AND d.path < CASE WHEN pages.path = '/' THEN '0' ELSE pages.path || '0' END
                  AND d.path <> pages.path
                  AND {COUNTED_SQL}
            )
            WHERE path = ?1 OR (path >= ?2 AND path < ?3)
            "
        ),
        params![base, lo, hi],
    )?;
    Ok(updated)
}
