use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use rusqlite::Connection;
use serde_json::json;

use crate::error::{ArborError, Result};
use crate::grant::{can_view_page, is_listable};
use crate::models::{
    ActionStage, ActionType, ChildrenTarget, ListPolicy, OperationState, Page, PageInfo,
    PageInfoOptions, PageInfoSelector, ProcessData, StageProcessInfo, User,
};
use crate::path::{ROOT_PATH, is_root, normalize_path};
use crate::state::{ledger, now_rfc3339, pages, revisions};

use super::Arbor;

impl Arbor {
    pub fn root_page(&self, viewer: &User) -> Result<Page> {
        let started = Instant::now();
        let key = format!("root|{}", viewer_key(viewer, ListPolicy::default()));
        let output = self.page_reads.run(&key, || {
            self.state.with_conn(|conn| {
                let mut page = pages::page_by_path(conn, ROOT_PATH)?
                    .ok_or_else(|| ArborError::NotFound(format!("root page {ROOT_PATH}")))?;
                if !can_view_page(viewer, &page) {
                    return Err(ArborError::PermissionDenied(format!(
                        "root page is not visible to {}",
                        viewer_label(viewer)
                    )));
                }
                attach_process_data(conn, std::slice::from_mut(&mut page))?;
                Ok(page)
            })
        });
        self.finish_request(
            "tree.root",
            started,
            Some(ROOT_PATH.to_string()),
            output,
            |_| None,
        )
    }

    /// Children listed with the configured policy.
    pub fn children(&self, target: &ChildrenTarget, viewer: &User) -> Result<Vec<Page>> {
        self.children_with_policy(target, viewer, self.config.list_policy)
    }

    /// Direct children in path order. Each child targeted by a pending rename
    /// carries `process_data`.
    pub fn children_with_policy(
        &self,
        target: &ChildrenTarget,
        viewer: &User,
        policy: ListPolicy,
    ) -> Result<Vec<Page>> {
        let started = Instant::now();
        let key = format!(
            "children|{}|{}",
            target.cache_key(),
            viewer_key(viewer, policy)
        );
        let output = self.listing_reads.run(&key, || {
            self.state.with_conn(|conn| {
                let parent = resolve_target(conn, target)?;
                if !can_view_page(viewer, &parent) {
                    return Err(ArborError::NotFound(format!("page {}", parent.path)));
                }
                let mut children: Vec<Page> = pages::visible_children(conn, &parent.id)?
                    .into_iter()
                    .filter(|child| is_listable(viewer, child, policy))
                    .collect();
                attach_process_data(conn, &mut children)?;
                Ok(children)
            })
        });
        self.finish_request(
            "tree.children",
            started,
            Some(target.cache_key()),
            output,
            |children| Some(json!({ "count": children.len() })),
        )
    }

    pub fn item(&self, id: &str, viewer: &User) -> Result<Page> {
        let started = Instant::now();
        let key = format!("item|id:{id}|{}", viewer_key(viewer, ListPolicy::default()));
        let output = self.page_reads.run(&key, || {
            self.state.with_conn(|conn| {
                let page = pages::page_by_id(conn, id)?;
                viewable_item(conn, page, viewer, id)
            })
        });
        self.finish_request("tree.item", started, Some(id.to_string()), output, |_| None)
    }

    pub fn item_by_path(&self, path: &str, viewer: &User) -> Result<Page> {
        let started = Instant::now();
        let output = normalize_path(path).and_then(|path| {
            let key = format!(
                "item|path:{path}|{}",
                viewer_key(viewer, ListPolicy::default())
            );
            self.page_reads.run(&key, || {
                self.state.with_conn(|conn| {
                    let page = pages::page_by_path(conn, &path)?;
                    viewable_item(conn, page, viewer, &path)
                })
            })
        });
        self.finish_request(
            "tree.item",
            started,
            Some(path.to_string()),
            output,
            |_| None,
        )
    }

    /// Page info keyed by page id. Pages the viewer cannot open are left out.
    pub fn page_info(
        &self,
        selector: &PageInfoSelector,
        viewer: &User,
        options: PageInfoOptions,
    ) -> Result<BTreeMap<String, PageInfo>> {
        let started = Instant::now();
        let target = match selector {
            PageInfoSelector::Ids(ids) => Some(ids.join(",")),
            PageInfoSelector::Path(path) => Some(path.clone()),
        };
        let output = (|| -> Result<BTreeMap<String, PageInfo>> {
            let (found, bodies) = self.state.with_conn(|conn| {
                let found = match selector {
                    PageInfoSelector::Ids(ids) => pages::pages_by_ids(conn, ids)?,
                    PageInfoSelector::Path(path) => {
                        let path = normalize_path(path)?;
                        let page = pages::page_by_path(conn, &path)?
                            .ok_or_else(|| ArborError::NotFound(format!("page {path}")))?;
                        vec![page]
                    }
                };
                let found: Vec<Page> = found
                    .into_iter()
                    .filter(|page| can_view_page(viewer, page))
                    .collect();

                let mut bodies = HashMap::new();
                if options.attach_short_body {
                    for page in &found {
                        if let Some(revision_id) = page.revision_id.as_deref()
                            && let Some(revision) = revisions::revision_by_id(conn, revision_id)?
                        {
                            bodies.insert(page.id.clone(), revision.body);
                        }
                    }
                }
                Ok((found, bodies))
            })?;

            let authority = self.config.operations.complete_deletion_authority;
            let mut out = BTreeMap::new();
            for page in found {
                let is_movable = !is_root(&page.path) && !page.is_trashed() && !viewer.is_guest();
                let bookmark_count = if options.attach_bookmark_count {
                    Some(self.bookmarks.count(&page.id)?)
                } else {
                    None
                };
                let short_body = bodies.get(&page.id).map(|body| {
                    self.summarizer
                        .summarize(body, self.config.short_body_max_chars)
                });
                let is_able_to_delete_completely =
                    !is_root(&page.path) && authority.permits(viewer, page.creator.as_deref());
                let is_revertible = page.is_trashed() && !viewer.is_guest();
                out.insert(
                    page.id.clone(),
                    PageInfo {
                        is_deletable: is_movable && !page.is_empty,
                        is_able_to_delete_completely,
                        is_revertible,
                        is_movable,
                        page_id: page.id,
                        path: page.path,
                        is_empty: page.is_empty,
                        descendant_count: page.descendant_count,
                        revision_id: page.revision_id,
                        bookmark_count,
                        short_body,
                    },
                );
            }
            Ok(out)
        })();
        self.finish_request("tree.info", started, target, output, |infos| {
            Some(json!({ "count": infos.len() }))
        })
    }
}

fn resolve_target(conn: &Connection, target: &ChildrenTarget) -> Result<Page> {
    match target {
        ChildrenTarget::Id(id) => pages::page_by_id(conn, id)?
            .ok_or_else(|| ArborError::NotFound(format!("page {id}"))),
        ChildrenTarget::Path(raw) => {
            let path = normalize_path(raw)?;
            pages::page_by_path(conn, &path)?
                .ok_or_else(|| ArborError::NotFound(format!("page {path}")))
        }
    }
}

fn viewable_item(conn: &Connection, page: Option<Page>, viewer: &User, label: &str) -> Result<Page> {
    let Some(mut page) = page.filter(|page| can_view_page(viewer, page)) else {
        return Err(ArborError::NotFound(format!("page {label}")));
    };
    attach_process_data(conn, std::slice::from_mut(&mut page))?;
    Ok(page)
}

/// Marks pages that a pending rename targets so callers can render them as
/// in progress.
fn attach_process_data(conn: &Connection, listed: &mut [Page]) -> Result<()> {
    if listed.is_empty() {
        return Ok(());
    }
    let ids: Vec<String> = listed.iter().map(|page| page.id.clone()).collect();
    let entries = ledger::operations_for_pages(conn, &ids)?;
    if entries.is_empty() {
        return Ok(());
    }
    let now = now_rfc3339();
    let mut by_page = HashMap::new();
    for entry in entries
        .into_iter()
        .filter(|entry| entry.action_type == ActionType::Rename)
    {
        by_page.entry(entry.page.page_id.clone()).or_insert(entry);
    }
    for page in listed.iter_mut() {
        let Some(entry) = by_page.get(&page.id) else {
            continue;
        };
        let info = StageProcessInfo {
            is_processable: entry.state != OperationState::Failed && entry.locked_until <= now,
        };
        let (main, sub) = match entry.action_stage {
            ActionStage::Main => (Some(info), None),
            ActionStage::Sub => (None, Some(info)),
        };
        page.process_data = Some(ProcessData {
            action_type: entry.action_type,
            main,
            sub,
        });
    }
    Ok(())
}

/// Coalescing key part for everything that changes what `viewer` may see.
fn viewer_key(viewer: &User, policy: ListPolicy) -> String {
    let mut groups = viewer.group_ids.clone();
    groups.sort();
    format!(
        "{}|{}|{}|{}{}",
        viewer.id,
        groups.join(","),
        u8::from(viewer.is_admin),
        u8::from(policy.include_owner_restricted),
        u8::from(policy.include_group_restricted),
    )
}

fn viewer_label(viewer: &User) -> &str {
    if viewer.is_guest() { "guest" } else { &viewer.id }
}
