//! Main, Sub and finalize steps for each structural mutation.
//!
//! Every step runs inside the caller's transaction and derives its work from
//! the rows as they are now, not from remembered progress. A Sub batch only
//! ever selects pages still waiting at their source location (or, for
//! Duplicate, pages after the stored cursor whose copy does not exist yet),
//! so re-running a step that already applied changes nothing.
//!
//! The object store is never called while a transaction is open. Objects a
//! Duplicate needs are copied beforehand ([`stage_object_copies`]) and the
//! step only records rows for them; objects a purge releases are deleted
//! once the rows are gone for good.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::error::{ArborError, Result};
use crate::events::PageEvent;
use crate::grant::can_view_page;
use crate::models::{ActionType, Attachment, Grant, OperationEntry, Page, PageStatus, Revision, User};
use crate::path::{ancestor_paths, is_descendant, parent_path, rebase_path};
use crate::state::pages::{PlaceholderFill, ScanOrder};
use crate::state::{attachments, descendants, ledger, pages, revisions};
use crate::uploader::{Uploader, duplicated_storage_key};

pub(super) struct StageContext<'a> {
    pub uploader: &'a dyn Uploader,
    pub now: String,
    /// Published once the surrounding transaction commits.
    pub events: Vec<PageEvent>,
    /// Source attachment id to the key of its already copied object.
    /// Whatever is left after commit is unreferenced.
    pub staged_copies: HashMap<String, String>,
    /// Keys of objects whose rows this step deleted.
    pub released_objects: Vec<String>,
}

impl<'a> StageContext<'a> {
    pub(super) fn new(uploader: &'a dyn Uploader) -> Self {
        Self {
            uploader,
            now: crate::state::now_rfc3339(),
            events: Vec::new(),
            staged_copies: HashMap::new(),
            released_objects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct PlannedCopy {
    pub source_attachment_id: String,
    pub from_key: String,
    pub to_key: String,
}

/// Objects the Main stage of a Duplicate copies: the target page's own
/// attachments.
pub(super) fn plan_main_copies(
    conn: &Connection,
    entry: &OperationEntry,
) -> Result<Vec<PlannedCopy>> {
    if entry.action_type != ActionType::Duplicate {
        return Ok(Vec::new());
    }
    match pages::page_by_id(conn, &entry.page.page_id)? {
        Some(page) => planned_copies(conn, entry, std::slice::from_ref(&page)),
        None => Ok(Vec::new()),
    }
}

/// Objects the next Duplicate batch of at most `limit` descendants copies.
pub(super) fn plan_sub_batch_copies(
    conn: &Connection,
    entry: &OperationEntry,
    limit: usize,
) -> Result<Vec<PlannedCopy>> {
    if entry.action_type != ActionType::Duplicate || limit == 0 {
        return Ok(Vec::new());
    }
    let mut sources = Vec::new();
    for source in duplicate_sources(conn, entry, limit)? {
        if copies_source(conn, entry, &source)? {
            sources.push(source);
        }
    }
    planned_copies(conn, entry, &sources)
}

fn planned_copies(
    conn: &Connection,
    entry: &OperationEntry,
    sources: &[Page],
) -> Result<Vec<PlannedCopy>> {
    if sources.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<String> = sources.iter().map(|page| page.id.clone()).collect();
    let only_related = entry.options.only_duplicate_user_related_resources;
    Ok(attachments::attachments_for_pages(conn, &ids)?
        .into_iter()
        .filter(|attachment| !only_related || attachment.owner == entry.user.id)
        .map(|attachment| PlannedCopy {
            to_key: duplicated_storage_key(&entry.id, &attachment.id, &attachment.file_name),
            source_attachment_id: attachment.id,
            from_key: attachment.storage_key,
        })
        .collect())
}

/// Copies every planned object. A source object that is already gone is
/// left out; any other failure removes the copies made so far.
pub(super) fn stage_object_copies(
    uploader: &dyn Uploader,
    planned: Vec<PlannedCopy>,
) -> Result<HashMap<String, String>> {
    let mut staged = HashMap::with_capacity(planned.len());
    for copy in planned {
        match uploader.copy(&copy.from_key, &copy.to_key) {
            Ok(()) => {
                staged.insert(copy.source_attachment_id, copy.to_key);
            }
            Err(ArborError::NotFound(_)) => tracing::warn!(
                target: "arbor::attachments",
                attachment_id = %copy.source_attachment_id,
                key = %copy.from_key,
                "attachment object vanished before duplication; skipped"
            ),
            Err(err) => {
                delete_objects(uploader, staged.into_values());
                return Err(err);
            }
        }
    }
    Ok(staged)
}

/// Best effort: a failed delete leaves an unreferenced object behind.
pub(super) fn delete_objects(uploader: &dyn Uploader, keys: impl IntoIterator<Item = String>) {
    for key in keys {
        if let Err(err) = uploader.delete(&key) {
            tracing::warn!(
                target: "arbor::attachments",
                key = %key,
                error = %err,
                "failed to delete attachment object"
            );
        }
    }
}

pub(super) fn apply_main_stage(
    conn: &Connection,
    entry: &OperationEntry,
    ctx: &mut StageContext<'_>,
) -> Result<()> {
    let page = pages::page_by_id(conn, &entry.page.page_id)?
        .ok_or_else(|| ArborError::NotFound(format!("page {}", entry.page.page_id)))?;
    if page.path != entry.from_path {
        return Err(ArborError::Conflict(format!(
            "page {} moved from {} to {} before the operation started",
            page.id, entry.from_path, page.path
        )));
    }
    match entry.action_type {
        ActionType::Rename => main_rename(conn, entry, &page, ctx),
        ActionType::Delete => main_delete(conn, entry, &page, ctx),
        ActionType::Revert => main_revert(conn, entry, &page, ctx),
        ActionType::Duplicate => main_duplicate(conn, entry, &page, ctx),
        ActionType::DeleteCompletely => main_delete_completely(conn, entry, &page, ctx),
    }
}

/// Processes at most `limit` descendants. Returns how many were examined;
/// fewer than `limit` means nothing is left.
pub(super) fn apply_sub_batch(
    conn: &Connection,
    entry: &OperationEntry,
    limit: usize,
    ctx: &mut StageContext<'_>,
) -> Result<usize> {
    if limit == 0 {
        return Ok(0);
    }
    match entry.action_type {
        ActionType::Rename => relocate_batch(conn, entry, limit, PageStatus::Published, ctx),
        ActionType::Delete | ActionType::Revert if !entry.options.is_recursively => Ok(0),
        ActionType::Delete => relocate_batch(conn, entry, limit, PageStatus::Trashed, ctx),
        ActionType::Revert => relocate_batch(conn, entry, limit, PageStatus::Published, ctx),
        ActionType::Duplicate => duplicate_batch(conn, entry, limit, ctx),
        ActionType::DeleteCompletely => purge_batch(conn, entry, limit, ctx),
    }
}

/// Last step before the entry is removed: drop leftover placeholders and
/// recount every range the operation touched.
pub(super) fn finalize_operation(
    conn: &Connection,
    entry: &OperationEntry,
    ctx: &mut StageContext<'_>,
) -> Result<()> {
    let from = entry.from_path.as_str();
    if entry.action_type == ActionType::DeleteCompletely
        && entry.options.is_recursively
        && let Some(target) = pages::page_by_id(conn, &entry.page.page_id)?
    {
        purge_content(conn, std::slice::from_ref(&target.id), ctx)?;
        pages::delete_page_row(conn, &target.id)?;
    }

    pages::prune_empty_leaves(conn, from)?;
    descendants::recount_descendants(conn, &ancestor_paths(from))?;
    if let Some(to) = entry.to_path.as_deref() {
        descendants::recount_subtree(conn, to)?;
        descendants::recount_descendants(conn, &ancestor_paths(to))?;
    }
    Ok(())
}

fn destination(entry: &OperationEntry) -> Result<&str> {
    entry.to_path.as_deref().ok_or_else(|| {
        ArborError::Internal(format!(
            "{} operation {} has no destination",
            entry.action_type, entry.id
        ))
    })
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn placeholder_page(path: &str, parent_id: Option<String>, now: &str) -> Page {
    Page {
        id: uuid::Uuid::new_v4().to_string(),
        path: path.to_string(),
        parent_id,
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
    }
}

/// Clears `dest` for `incoming`: an empty placeholder there hands its
/// children over and disappears, an authored page is a conflict.
fn merge_placeholder(conn: &Connection, dest: &str, incoming: &str) -> Result<()> {
    let Some(existing) = pages::page_by_path(conn, dest)? else {
        return Ok(());
    };
    if existing.id == incoming {
        return Ok(());
    }
    if !existing.is_empty {
        return Err(ArborError::Conflict(format!("page already exists: {dest}")));
    }
    pages::unlink_children(conn, &existing.id, Some(incoming))?;
    pages::delete_page_row(conn, &existing.id)?;
    Ok(())
}

/// Moves a whole subtree's root to its destination under a live parent.
fn attach_at(conn: &Connection, page: &Page, dest: &str, now: &str) -> Result<()> {
    merge_placeholder(conn, dest, &page.id)?;
    let parent_id = pages::ensure_parent(conn, dest, now)?;
    pages::set_page_location(conn, &page.id, dest, Some(&parent_id), PageStatus::Published, now)
}

fn main_rename(
    conn: &Connection,
    entry: &OperationEntry,
    page: &Page,
    ctx: &mut StageContext<'_>,
) -> Result<()> {
    let to = destination(entry)?;
    let moved = saturating_i64(pages::count_tree_visible_in_subtree(conn, &page.path)?);
    descendants::adjust_descendant_count(conn, &page.id, -moved, false)?;
    attach_at(conn, page, to, &ctx.now)?;
    descendants::adjust_descendant_count(conn, &page.id, moved, false)?;
    if let Some(old_parent) = parent_path(&entry.from_path) {
        pages::prune_empty_leaves(conn, old_parent)?;
    }
    Ok(())
}

fn main_delete(
    conn: &Connection,
    entry: &OperationEntry,
    page: &Page,
    ctx: &mut StageContext<'_>,
) -> Result<()> {
    let trash = destination(entry)?;
    let removed = if entry.options.is_recursively {
        pages::count_tree_visible_in_subtree(conn, &page.path)?
    } else {
        u64::from(page.is_tree_visible())
    };
    descendants::adjust_descendant_count(conn, &page.id, -saturating_i64(removed), false)?;
    pages::set_page_location(conn, &page.id, trash, None, PageStatus::Trashed, &ctx.now)?;

    if !entry.options.is_recursively && pages::has_children(conn, &page.id)? {
        let mut stand_in = placeholder_page(&entry.from_path, page.parent_id.clone(), &ctx.now);
        stand_in.descendant_count = page.descendant_count;
        pages::insert_page(conn, &stand_in)?;
        pages::unlink_children(conn, &page.id, Some(&stand_in.id))?;
    }
    if let Some(parent) = parent_path(&entry.from_path) {
        pages::prune_empty_leaves(conn, parent)?;
    }
    Ok(())
}

fn main_revert(
    conn: &Connection,
    entry: &OperationEntry,
    page: &Page,
    ctx: &mut StageContext<'_>,
) -> Result<()> {
    let to = destination(entry)?;
    if !entry.options.is_recursively {
        pages::unlink_children(conn, &page.id, None)?;
    }
    attach_at(conn, page, to, &ctx.now)?;
    let restored = pages::page_by_id(conn, &page.id)?
        .ok_or_else(|| ArborError::NotFound(format!("page {}", page.id)))?;
    if restored.is_tree_visible() {
        descendants::adjust_descendant_count(conn, &restored.id, 1, false)?;
    }
    Ok(())
}

fn main_duplicate(
    conn: &Connection,
    entry: &OperationEntry,
    page: &Page,
    ctx: &mut StageContext<'_>,
) -> Result<()> {
    let to = destination(entry)?;
    let copy = copy_page(
        conn,
        page,
        to,
        entry.options.duplicated_page_id.as_deref(),
        &entry.user,
        entry.options.only_duplicate_user_related_resources,
        ctx,
    )?
    .ok_or_else(|| ArborError::Conflict(format!("page already exists: {to}")))?;
    if copy.is_tree_visible() {
        descendants::adjust_descendant_count(conn, &copy.id, 1, false)?;
    }
    Ok(())
}

fn main_delete_completely(
    conn: &Connection,
    entry: &OperationEntry,
    page: &Page,
    ctx: &mut StageContext<'_>,
) -> Result<()> {
    let removed = if entry.options.is_recursively {
        pages::count_tree_visible_in_subtree(conn, &page.path)?
    } else {
        u64::from(page.is_tree_visible())
    };
    descendants::adjust_descendant_count(conn, &page.id, -saturating_i64(removed), false)?;

    if entry.options.is_recursively {
        // The row itself goes last, after every descendant.
        pages::set_page_parent(conn, &page.id, None)?;
    } else {
        purge_content(conn, std::slice::from_ref(&page.id), ctx)?;
        if pages::has_children(conn, &page.id)? {
            pages::make_placeholder(conn, &page.id, &ctx.now)?;
        } else {
            pages::delete_page_row(conn, &page.id)?;
        }
    }
    if let Some(parent) = parent_path(&entry.from_path) {
        pages::prune_empty_leaves(conn, parent)?;
    }
    Ok(())
}

/// Rename, Delete and Revert: move the next descendants still under
/// `from_path` to the same place under `to_path`. Moved pages leave the
/// scanned range, so every batch starts from the front.
fn relocate_batch(
    conn: &Connection,
    entry: &OperationEntry,
    limit: usize,
    status: PageStatus,
    ctx: &mut StageContext<'_>,
) -> Result<usize> {
    let from = entry.from_path.as_str();
    let to = destination(entry)?;
    let order = match status {
        PageStatus::Published => ScanOrder::Ascending,
        PageStatus::Trashed => ScanOrder::Descending,
    };
    let batch = pages::descendants_batch(conn, from, None, limit, order)?;
    for page in &batch {
        let Some(dest) = rebase_path(&page.path, from, to) else {
            continue;
        };
        if status == PageStatus::Published {
            merge_placeholder(conn, &dest, &page.id)?;
        } else if pages::page_by_path(conn, &dest)?.is_some() {
            return Err(ArborError::Conflict(format!("trash already holds {dest}")));
        }
        match pages::set_page_location(
            conn,
            &page.id,
            &dest,
            page.parent_id.as_deref(),
            status,
            &ctx.now,
        ) {
            Err(ArborError::NotFound(_)) => continue,
            other => other?,
        }
    }
    Ok(batch.len())
}

fn duplicate_batch(
    conn: &Connection,
    entry: &OperationEntry,
    limit: usize,
    ctx: &mut StageContext<'_>,
) -> Result<usize> {
    let from = entry.from_path.as_str();
    let to = destination(entry)?;
    let only_related = entry.options.only_duplicate_user_related_resources;
    let batch = duplicate_sources(conn, entry, limit)?;
    for source in &batch {
        if !copies_source(conn, entry, source)? {
            continue;
        }
        let Some(dest) = rebase_path(&source.path, from, to) else {
            continue;
        };
        copy_page(conn, source, &dest, None, &entry.user, only_related, ctx)?;
    }
    if let Some(last) = batch.last() {
        ledger::set_progress_cursor(conn, &entry.id, Some(&last.path), &ctx.now)?;
    }
    Ok(batch.len())
}

/// The next `limit` descendants after the stored cursor, copied or not.
fn duplicate_sources(conn: &Connection, entry: &OperationEntry, limit: usize) -> Result<Vec<Page>> {
    if !entry.options.is_recursively {
        return Ok(Vec::new());
    }
    pages::descendants_batch(
        conn,
        &entry.from_path,
        entry.progress_cursor.as_deref(),
        limit,
        ScanOrder::Ascending,
    )
}

/// Whether a Duplicate copies `source`. In only-user-related mode a page
/// the user cannot open hides its whole subtree, path included.
fn copies_source(conn: &Connection, entry: &OperationEntry, source: &Page) -> Result<bool> {
    if source.is_empty {
        return Ok(false);
    }
    if !entry.options.only_duplicate_user_related_resources {
        return Ok(true);
    }
    if !can_view_page(&entry.user, source) {
        return Ok(false);
    }
    for path in ancestor_paths(&source.path) {
        if !is_descendant(&path, &entry.from_path) {
            break;
        }
        if let Some(ancestor) = pages::page_by_path(conn, &path)?
            && !ancestor.is_empty
            && !can_view_page(&entry.user, &ancestor)
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Delete-completely: content of the deepest pages first, then their rows.
fn purge_batch(
    conn: &Connection,
    entry: &OperationEntry,
    limit: usize,
    ctx: &mut StageContext<'_>,
) -> Result<usize> {
    if !entry.options.is_recursively {
        return Ok(0);
    }
    let batch =
        pages::descendants_batch(conn, &entry.from_path, None, limit, ScanOrder::Descending)?;
    let ids: Vec<String> = batch.iter().map(|page| page.id.clone()).collect();
    purge_content(conn, &ids, ctx)?;
    for id in &ids {
        pages::delete_page_row(conn, id)?;
    }
    Ok(batch.len())
}

/// Deletes attachment rows and revisions of `page_ids`, releasing their
/// stored objects.
fn purge_content(conn: &Connection, page_ids: &[String], ctx: &mut StageContext<'_>) -> Result<()> {
    for attachment in attachments::attachments_for_pages(conn, page_ids)? {
        ctx.released_objects.push(attachment.storage_key);
        ctx.events.push(PageEvent::AttachmentDetached {
            page_id: attachment.page_id,
            attachment_id: attachment.id,
        });
    }
    attachments::delete_attachments_for_pages(conn, page_ids)?;
    revisions::delete_revisions_for_pages(conn, page_ids)?;
    Ok(())
}

/// Copies `source` to `dest` with a fresh revision authored by `user`.
/// Returns `None` when an authored page already sits at `dest`.
fn copy_page(
    conn: &Connection,
    source: &Page,
    dest: &str,
    dest_id: Option<&str>,
    user: &User,
    only_related: bool,
    ctx: &mut StageContext<'_>,
) -> Result<Option<Page>> {
    let body = match source.revision_id.as_deref() {
        Some(revision_id) => revisions::revision_by_id(conn, revision_id)?
            .map(|revision| revision.body)
            .unwrap_or_default(),
        None => String::new(),
    };
    let granted_user = match source.grant {
        Grant::Owner => Some(user.id.clone()),
        Grant::Public | Grant::Restricted | Grant::UserGroup => None,
    };
    let revision_id = uuid::Uuid::new_v4().to_string();
    let now = ctx.now.clone();

    let page_id = match pages::page_by_path(conn, dest)? {
        Some(existing) if !existing.is_empty => return Ok(None),
        Some(placeholder) => {
            pages::fill_placeholder(
                conn,
                &placeholder.id,
                &PlaceholderFill {
                    grant: source.grant,
                    granted_user: granted_user.as_deref(),
                    granted_group: source.granted_group.as_deref(),
                    creator: &user.id,
                    wip: source.wip,
                },
                &now,
            )?;
            insert_copy_revision(conn, &placeholder.id, &revision_id, body, user, &now)?;
            if !pages::set_page_revision(conn, &placeholder.id, &revision_id, None, &now)? {
                return Err(ArborError::Conflict(format!(
                    "placeholder at {dest} changed concurrently"
                )));
            }
            placeholder.id
        }
        None => {
            let parent_id = pages::ensure_parent(conn, dest, &now)?;
            let copy = Page {
                id: dest_id
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                path: dest.to_string(),
                parent_id: Some(parent_id),
                descendant_count: 0,
                grant: source.grant,
                granted_user,
                granted_group: source.granted_group.clone(),
                creator: Some(user.id.clone()),
                revision_id: Some(revision_id.clone()),
                is_empty: false,
                wip: source.wip,
                status: PageStatus::Published,
                created_at: now.clone(),
                updated_at: now.clone(),
                process_data: None,
            };
            pages::insert_page(conn, &copy)?;
            insert_copy_revision(conn, &copy.id, &revision_id, body, user, &now)?;
            copy.id
        }
    };

    for original in attachments::list_attachments(conn, &source.id)? {
        if only_related && original.owner != user.id {
            continue;
        }
        let Some(storage_key) = ctx.staged_copies.remove(&original.id) else {
            tracing::debug!(
                target: "arbor::attachments",
                page_id = %source.id,
                attachment_id = %original.id,
                "attachment has no staged copy; skipped"
            );
            continue;
        };
        let attachment_id = uuid::Uuid::new_v4().to_string();
        attachments::insert_attachment(
            conn,
            &Attachment {
                id: attachment_id.clone(),
                page_id: page_id.clone(),
                owner: original.owner,
                file_name: original.file_name,
                storage_key,
                size: original.size,
                created_at: now.clone(),
            },
        )?;
        ctx.events.push(PageEvent::AttachmentAttached {
            page_id: page_id.clone(),
            attachment_id,
        });
    }

    pages::page_by_id(conn, &page_id)
}

fn insert_copy_revision(
    conn: &Connection,
    page_id: &str,
    revision_id: &str,
    body: String,
    user: &User,
    now: &str,
) -> Result<()> {
    revisions::insert_revision(
        conn,
        &Revision {
            id: revision_id.to_string(),
            page_id: page_id.to_string(),
            body,
            author: user.id.clone(),
            created_at: now.to_string(),
        },
    )
}
