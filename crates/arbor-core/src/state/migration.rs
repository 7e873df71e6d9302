use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{ArborError, Result};

use super::{SqliteStore, now_rfc3339};

const SCHEMA_MIGRATION_NAME: &str = "arbor-0001-page-tree";
const LEASE_OWNER_MIGRATION_NAME: &str = "arbor-0002-operation-lease-owner";

/// Legacy revision migration that left page revision pointers dangling on
/// some installations. Its presence gates revision normalization.
pub(crate) const KNOWN_BAD_REVISION_MIGRATION: &str =
    "20211227060705-revision-path-to-page-id-schema-migration--fixed-7549";

const MIGRATION_SCHEMA_SQL: &str = r"
    PRAGMA journal_mode = WAL;
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS pages (
        id TEXT PRIMARY KEY,
        path TEXT NOT NULL UNIQUE,
        parent_id TEXT,
        descendant_count INTEGER NOT NULL DEFAULT 0,
        grant_level TEXT NOT NULL,
        granted_user TEXT,
        granted_group TEXT,
        creator TEXT,
        revision_id TEXT,
        is_empty INTEGER NOT NULL DEFAULT 0,
        wip INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL CHECK(status IN ('published', 'trashed')),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS revisions (
        id TEXT PRIMARY KEY,
        page_id TEXT NOT NULL,
        body TEXT NOT NULL,
        author TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS attachments (
        id TEXT PRIMARY KEY,
        page_id TEXT NOT NULL,
        owner TEXT NOT NULL,
        file_name TEXT NOT NULL,
        storage_key TEXT NOT NULL UNIQUE,
        size INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS page_operations (
        id TEXT PRIMARY KEY,
        action_type TEXT NOT NULL,
        action_stage TEXT NOT NULL CHECK(action_stage IN ('main', 'sub')),
        state TEXT NOT NULL,
        page_id TEXT NOT NULL,
        page_snapshot_json TEXT NOT NULL,
        from_path TEXT NOT NULL,
        to_path TEXT,
        options_json TEXT NOT NULL,
        user_json TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        progress_cursor TEXT,
        locked_until TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        locked_by TEXT
    );

    CREATE TABLE IF NOT EXISTS schema_migrations (
        name TEXT PRIMARY KEY,
        applied_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS system_kv (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_pages_parent_id ON pages(parent_id);
    CREATE INDEX IF NOT EXISTS idx_revisions_page_created ON revisions(page_id, created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_attachments_page_id ON attachments(page_id);
    CREATE INDEX IF NOT EXISTS idx_page_operations_from_path ON page_operations(from_path);
    CREATE INDEX IF NOT EXISTS idx_page_operations_to_path ON page_operations(to_path);
    CREATE INDEX IF NOT EXISTS idx_page_operations_page_id ON page_operations(page_id);
";

impl SqliteStore {
    pub fn migrate(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| ArborError::lock_poisoned("sqlite"))?;
        conn.execute_batch(MIGRATION_SCHEMA_SQL)?;
        ensure_required_column(
            &conn,
            "pages",
            "grant_level",
            "unsupported pages schema: grant_level is missing; reset the state database",
        )?;
        ensure_required_column(
            &conn,
            "page_operations",
            "progress_cursor",
            "unsupported page_operations schema: progress_cursor is missing; reset the state database",
        )?;
        record_migration_with(&conn, SCHEMA_MIGRATION_NAME)?;
        if !has_column(&conn, "page_operations", "locked_by")? {
            conn.execute("ALTER TABLE page_operations ADD COLUMN locked_by TEXT", [])?;
        }
        record_migration_with(&conn, LEASE_OWNER_MIGRATION_NAME)?;
        drop(conn);
        Ok(())
    }

    /// Marks a migration as applied. Importers use this to carry over the
    /// history of the installation they were copied from.
    pub fn record_migration(&self, name: &str) -> Result<()> {
        self.with_conn(|conn| record_migration_with(conn, name))
    }

    pub fn has_migration(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            Ok(found)
        })
    }
}

fn record_migration_with(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(name, applied_at) VALUES (?1, ?2)",
        params![name, now_rfc3339()],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for row in rows {
        if row? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn ensure_required_column(
    conn: &Connection,
    table: &str,
    column: &str,
    error_message: &'static str,
) -> Result<()> {
    if has_column(conn, table, column)? {
        Ok(())
    } else {
        Err(ArborError::Validation(error_message.to_string()))
    }
}
