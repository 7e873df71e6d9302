use std::time::Instant;

use serde_json::json;

use crate::error::{ArborError, Result};
use crate::events::PageEvent;
use crate::grant::can_view_page;
use crate::models::{Attachment, CreatePageOptions, Grant, Page, PageStatus, Revision, User};
use crate::path::normalize_writable_path;
use crate::state::pages::PlaceholderFill;
use crate::state::{attachments, descendants, ledger, now_rfc3339, pages, revisions};
use crate::uploader::attachment_storage_key;

use super::Arbor;

impl Arbor {
    /// Writes the first revision of `path`. Missing ancestors become empty
    /// placeholders; an existing placeholder at `path` is taken over.
    pub fn create_page(
        &self,
        path: &str,
        body: &str,
        user: &User,
        options: &CreatePageOptions,
    ) -> Result<Page> {
        let started = Instant::now();
        let output = (|| -> Result<Page> {
            if user.is_guest() {
                return Err(ArborError::PermissionDenied(
                    "guests cannot create pages".to_string(),
                ));
            }
            let path = normalize_writable_path(path)?;
            let (granted_user, granted_group) = grant_targets(user, options)?;

            let page = self.state.with_tx(|tx| {
                if let Some(entry) = ledger::find_covering_operation(tx, &path)? {
                    return Err(ArborError::Conflict(format!(
                        "{path} is covered by pending {} operation {}",
                        entry.action_type, entry.id
                    )));
                }
                let now = now_rfc3339();
                let revision_id = uuid::Uuid::new_v4().to_string();

                let page_id = match pages::page_by_path(tx, &path)? {
                    Some(existing) if !existing.is_empty => {
                        return Err(ArborError::Conflict(format!("page already exists: {path}")));
                    }
                    Some(placeholder) => {
                        pages::fill_placeholder(
                            tx,
                            &placeholder.id,
                            &PlaceholderFill {
                                grant: options.grant,
                                granted_user: granted_user.as_deref(),
                                granted_group: granted_group.as_deref(),
                                creator: &user.id,
                                wip: options.wip,
                            },
                            &now,
                        )?;
                        insert_first_revision(tx, &placeholder.id, &revision_id, body, user, &now)?;
                        if !pages::set_page_revision(tx, &placeholder.id, &revision_id, None, &now)? {
                            return Err(ArborError::Conflict(format!(
                                "placeholder at {path} changed concurrently"
                            )));
                        }
                        placeholder.id
                    }
                    None => {
                        let parent_id = pages::ensure_parent(tx, &path, &now)?;
                        let page = Page {
                            id: uuid::Uuid::new_v4().to_string(),
                            path: path.clone(),
                            parent_id: Some(parent_id),
                            descendant_count: 0,
                            grant: options.grant,
                            granted_user: granted_user.clone(),
                            granted_group: granted_group.clone(),
                            creator: Some(user.id.clone()),
                            revision_id: Some(revision_id.clone()),
                            is_empty: false,
                            wip: options.wip,
                            status: PageStatus::Published,
                            created_at: now.clone(),
                            updated_at: now.clone(),
                            process_data: None,
                        };
                        pages::insert_page(tx, &page)?;
                        insert_first_revision(tx, &page.id, &revision_id, body, user, &now)?;
                        page.id
                    }
                };

                let page = pages::page_by_id(tx, &page_id)?
                    .ok_or_else(|| ArborError::Internal(format!("created page {page_id} vanished")))?;
                if page.is_tree_visible() {
                    descendants::adjust_descendant_count(tx, &page.id, 1, false)?;
                }
                Ok(page)
            })?;

            self.events.publish(&PageEvent::PageCreated {
                page_id: page.id.clone(),
                path: page.path.clone(),
            });
            Ok(page)
        })();
        self.finish_request(
            "page.create",
            started,
            Some(path.to_string()),
            output,
            |page| Some(json!({ "page_id": &page.id, "grant": page.grant.as_str() })),
        )
    }

    /// Stores `bytes` through the configured uploader and records the
    /// attachment against `page_id`.
    pub fn attach_file(
        &self,
        page_id: &str,
        file_name: &str,
        bytes: &[u8],
        user: &User,
    ) -> Result<Attachment> {
        let started = Instant::now();
        let output = (|| -> Result<Attachment> {
            if user.is_guest() {
                return Err(ArborError::PermissionDenied(
                    "guests cannot attach files".to_string(),
                ));
            }
            let file_name = file_name.trim();
            if file_name.is_empty() {
                return Err(ArborError::Validation("file name is required".to_string()));
            }
            let page = self.state.with_conn(|conn| {
                pages::page_by_id(conn, page_id)?
                    .ok_or_else(|| ArborError::NotFound(format!("page {page_id}")))
            })?;
            if page.is_trashed() || page.is_empty {
                return Err(ArborError::Validation(format!(
                    "cannot attach files to {}",
                    page.path
                )));
            }
            if !can_view_page(user, &page) {
                return Err(ArborError::PermissionDenied(format!(
                    "{} is not visible to {}",
                    page.path, user.id
                )));
            }

            let attachment_id = uuid::Uuid::new_v4().to_string();
            let attachment = Attachment {
                storage_key: attachment_storage_key(&page.id, &attachment_id, file_name),
                id: attachment_id,
                page_id: page.id.clone(),
                owner: user.id.clone(),
                file_name: file_name.to_string(),
                size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
                created_at: now_rfc3339(),
            };
            self.uploader.save(&attachment.storage_key, bytes)?;
            let recorded = self
                .state
                .with_conn(|conn| attachments::insert_attachment(conn, &attachment));
            if let Err(err) = recorded {
                if let Err(cleanup) = self.uploader.delete(&attachment.storage_key) {
                    tracing::warn!(
                        target: "arbor::attachments",
                        key = %attachment.storage_key,
                        error = %cleanup,
                        "failed to remove unrecorded upload"
                    );
                }
                return Err(err);
            }

            self.events.publish(&PageEvent::AttachmentAttached {
                page_id: attachment.page_id.clone(),
                attachment_id: attachment.id.clone(),
            });
            Ok(attachment)
        })();
        self.finish_request(
            "attachment.attach",
            started,
            Some(page_id.to_string()),
            output,
            |attachment| Some(json!({ "attachment_id": &attachment.id, "size": attachment.size })),
        )
    }

    pub fn list_attachments(&self, page_id: &str, viewer: &User) -> Result<Vec<Attachment>> {
        self.state.with_conn(|conn| {
            let page = pages::page_by_id(conn, page_id)?
                .filter(|page| can_view_page(viewer, page))
                .ok_or_else(|| ArborError::NotFound(format!("page {page_id}")))?;
            attachments::list_attachments(conn, &page.id)
        })
    }

    /// Only the uploader or an administrator may remove an attachment.
    pub fn delete_attachment(&self, attachment_id: &str, user: &User) -> Result<()> {
        let started = Instant::now();
        let output = (|| -> Result<()> {
            let attachment = self.state.with_conn(|conn| {
                attachments::attachment_by_id(conn, attachment_id)?
                    .ok_or_else(|| ArborError::NotFound(format!("attachment {attachment_id}")))
            })?;
            if user.is_guest() || (!user.is_admin && attachment.owner != user.id) {
                return Err(ArborError::PermissionDenied(format!(
                    "attachment {attachment_id} belongs to {}",
                    attachment.owner
                )));
            }
            self.uploader.delete(&attachment.storage_key)?;
            self.state
                .with_conn(|conn| attachments::delete_attachment_row(conn, &attachment.id))?;
            self.events.publish(&PageEvent::AttachmentDetached {
                page_id: attachment.page_id,
                attachment_id: attachment.id,
            });
            Ok(())
        })();
        self.finish_request(
            "attachment.delete",
            started,
            Some(attachment_id.to_string()),
            output,
            |()| None,
        )
    }
}

/// Who an owner- or group-restricted page is granted to.
fn grant_targets(
    user: &User,
    options: &CreatePageOptions,
) -> Result<(Option<String>, Option<String>)> {
    match options.grant {
        Grant::Public | Grant::Restricted => Ok((None, None)),
        Grant::Owner => Ok((Some(user.id.clone()), None)),
        Grant::UserGroup => {
            let group = options
                .granted_group
                .as_deref()
                .map(str::trim)
                .filter(|group| !group.is_empty())
                .ok_or_else(|| {
                    ArborError::Validation("user_group grant requires a group".to_string())
                })?;
            if !user.is_admin && !user.group_ids.iter().any(|candidate| candidate == group) {
                return Err(ArborError::PermissionDenied(format!(
                    "{} is not a member of {group}",
                    user.id
                )));
            }
            Ok((None, Some(group.to_string())))
        }
    }
}

fn insert_first_revision(
    conn: &rusqlite::Connection,
    page_id: &str,
    revision_id: &str,
    body: &str,
    user: &User,
    now: &str,
) -> Result<()> {
    revisions::insert_revision(
        conn,
        &Revision {
            id: revision_id.to_string(),
            page_id: page_id.to_string(),
            body: body.to_string(),
            author: user.id.clone(),
            created_at: now.to_string(),
        },
    )
}
