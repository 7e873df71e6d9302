use std::time::Instant;

use rusqlite::Connection;
use serde_json::json;

use crate::error::{ArborError, Result, RevisionConflict};
use crate::events::PageEvent;
use crate::grant::can_view_page;
use crate::models::{NormalizeOutcome, Page, Revision, User};
use crate::state::{KNOWN_BAD_REVISION_MIGRATION, descendants, now_rfc3339, pages, revisions};

use super::Arbor;

const DEFAULT_REVISION_LIMIT: usize = 50;

impl Arbor {
    /// Saves `body` as the next revision if `origin_revision_id` is still the
    /// page's current revision. A stale origin fails with
    /// [`ArborError::RevisionConflict`] carrying the remote revision.
    pub fn update_page(
        &self,
        page_id: &str,
        origin_revision_id: Option<&str>,
        body: &str,
        user: &User,
    ) -> Result<Page> {
        let started = Instant::now();
        let output = (|| -> Result<Page> {
            if user.is_guest() {
                return Err(ArborError::PermissionDenied(
                    "guests cannot edit pages".to_string(),
                ));
            }
            if self.revision_migration_affected()? {
                self.state
                    .with_tx(|tx| normalize_revision_pointer(tx, page_id))?;
            }

            let page = self.state.with_tx(|tx| {
                let page = pages::page_by_id(tx, page_id)?
                    .ok_or_else(|| ArborError::NotFound(format!("page {page_id}")))?;
                if page.is_trashed() {
                    return Err(ArborError::Validation(format!(
                        "{} is in the trash; revert it before editing",
                        page.path
                    )));
                }
                if !can_view_page(user, &page) {
                    return Err(ArborError::PermissionDenied(format!(
                        "{} is not visible to {}",
                        page.path, user.id
                    )));
                }

                let current = page.revision_id.as_deref();
                if current != origin_revision_id {
                    return Err(stale_origin(tx, &page, origin_revision_id)?);
                }

                let now = now_rfc3339();
                let revision = Revision {
                    id: uuid::Uuid::new_v4().to_string(),
                    page_id: page.id.clone(),
                    body: body.to_string(),
                    author: user.id.clone(),
                    created_at: now.clone(),
                };
                revisions::insert_revision(tx, &revision)?;
                if !pages::set_page_revision(tx, &page.id, &revision.id, current, &now)? {
                    return Err(stale_origin(tx, &page, origin_revision_id)?);
                }

                let updated = pages::page_by_id(tx, &page.id)?
                    .ok_or_else(|| ArborError::NotFound(format!("page {page_id}")))?;
                if !page.is_tree_visible() && updated.is_tree_visible() {
                    descendants::adjust_descendant_count(tx, &updated.id, 1, false)?;
                }
                Ok(updated)
            })?;

            if let Some(revision_id) = page.revision_id.clone() {
                self.events.publish(&PageEvent::PageUpdated {
                    page_id: page.id.clone(),
                    path: page.path.clone(),
                    revision_id,
                });
            }
            Ok(page)
        })();
        self.finish_request(
            "page.update",
            started,
            Some(page_id.to_string()),
            output,
            |page| {
                Some(json!({
                    "origin_revision_id": origin_revision_id,
                    "revision_id": &page.revision_id,
                }))
            },
        )
    }

    /// Current revision of the page.
    pub fn page_revision(&self, page_id: &str, viewer: &User) -> Result<Revision> {
        self.state.with_conn(|conn| {
            let page = viewable_page(conn, page_id, viewer)?;
            let revision_id = page
                .revision_id
                .ok_or_else(|| ArborError::NotFound(format!("{} has no revision", page.path)))?;
            revisions::revision_by_id(conn, &revision_id)?
                .ok_or_else(|| ArborError::NotFound(format!("revision {revision_id}")))
        })
    }

    /// Newest first.
    pub fn list_revisions(
        &self,
        page_id: &str,
        limit: Option<usize>,
        viewer: &User,
    ) -> Result<Vec<Revision>> {
        self.state.with_conn(|conn| {
            let page = viewable_page(conn, page_id, viewer)?;
            revisions::list_revisions(conn, &page.id, limit.unwrap_or(DEFAULT_REVISION_LIMIT))
        })
    }

    /// Repairs a page whose revision pointer does not reference one of its own
    /// revisions. Installations that never ran the faulty migration skip the
    /// check entirely.
    pub fn normalize_if_broken(&self, page_id: &str) -> Result<NormalizeOutcome> {
        let started = Instant::now();
        let output = (|| -> Result<NormalizeOutcome> {
            if !self.revision_migration_affected()? {
                return Ok(NormalizeOutcome::NotAffected);
            }
            self.state
                .with_tx(|tx| normalize_revision_pointer(tx, page_id))
        })();
        self.finish_request(
            "page.normalize_revision",
            started,
            Some(page_id.to_string()),
            output,
            |outcome| serde_json::to_value(outcome).ok(),
        )
    }

    /// Read once per instance.
    fn revision_migration_affected(&self) -> Result<bool> {
        if let Some(affected) = self.revision_migration_affected.get() {
            return Ok(*affected);
        }
        let affected = self.state.has_migration(KNOWN_BAD_REVISION_MIGRATION)?;
        Ok(*self.revision_migration_affected.get_or_init(|| affected))
    }
}

fn viewable_page(conn: &Connection, page_id: &str, viewer: &User) -> Result<Page> {
    pages::page_by_id(conn, page_id)?
        .filter(|page| can_view_page(viewer, page))
        .ok_or_else(|| ArborError::NotFound(format!("page {page_id}")))
}

fn stale_origin(conn: &Connection, page: &Page, origin: Option<&str>) -> Result<ArborError> {
    let Some(remote_id) = page.revision_id.as_deref() else {
        return Ok(ArborError::Conflict(format!(
            "{} has no content yet; save without an origin revision",
            page.path
        )));
    };
    let Some(remote) = revisions::revision_by_id(conn, remote_id)? else {
        return Ok(ArborError::Conflict(format!(
            "current revision {remote_id} of {} is missing",
            page.path
        )));
    };
    Ok(ArborError::RevisionConflict(Box::new(RevisionConflict {
        page_id: page.id.clone(),
        path: page.path.clone(),
        origin_revision_id: origin.map(str::to_string),
        remote_revision_id: remote.id,
        remote_body: remote.body,
        remote_author: remote.author,
        remote_created_at: remote.created_at,
    })))
}

fn normalize_revision_pointer(conn: &Connection, page_id: &str) -> Result<NormalizeOutcome> {
    let page = pages::page_by_id(conn, page_id)?
        .ok_or_else(|| ArborError::NotFound(format!("page {page_id}")))?;
    let Some(pointer) = page.revision_id.as_deref() else {
        if page.is_empty {
            return Ok(NormalizeOutcome::Healthy);
        }
        return relink_latest(conn, &page, None);
    };

    match revisions::revision_by_id(conn, pointer)? {
        Some(revision) if revision.page_id == page.id => Ok(NormalizeOutcome::Healthy),
        Some(revision) if pages::page_by_id(conn, &revision.page_id)?.is_none() => {
            revisions::set_revision_page(conn, &revision.id, &page.id)?;
            tracing::info!(
                target: "arbor::revisions",
                page_id = %page.id,
                revision_id = %revision.id,
                "orphaned revision reassigned to page"
            );
            Ok(NormalizeOutcome::Reassigned {
                revision_id: revision.id,
            })
        }
        _ => relink_latest(conn, &page, Some(pointer)),
    }
}

fn relink_latest(conn: &Connection, page: &Page, pointer: Option<&str>) -> Result<NormalizeOutcome> {
    let Some(latest) = revisions::latest_revision_for_page(conn, &page.id)? else {
        tracing::warn!(
            target: "arbor::revisions",
            page_id = %page.id,
            pointer = pointer.unwrap_or("none"),
            "page revision pointer is broken and no revision can replace it"
        );
        return Ok(NormalizeOutcome::Unrecoverable);
    };
    if !pages::set_page_revision(conn, &page.id, &latest.id, pointer, &now_rfc3339())? {
        return Err(ArborError::Conflict(format!(
            "revision pointer of {} changed during repair",
            page.path
        )));
    }
    tracing::info!(
        target: "arbor::revisions",
        page_id = %page.id,
        revision_id = %latest.id,
        "page revision pointer relinked"
    );
    Ok(NormalizeOutcome::Relinked {
        revision_id: latest.id,
    })
}
