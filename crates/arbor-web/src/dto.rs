use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use arbor_core::models::{
    DeleteOptions, DuplicateOptions, Grant, OperationEntry, Page, PageInfo, RenameOptions,
    Revision, RevertOptions,
};

#[derive(Debug, Deserialize)]
pub struct ChildrenQuery {
    pub id: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ItemQuery {
    pub id: String,
}

/// `page_ids` is comma separated.
#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub page_ids: Option<String>,
    pub path: Option<String>,
    #[serde(default)]
    pub attach_bookmark_count: bool,
    #[serde(default)]
    pub attach_short_body: bool,
}

#[derive(Debug, Deserialize)]
pub struct RevisionsQuery {
    pub page_id: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePageRequest {
    pub path: String,
    #[serde(default)]
    pub body: String,
    pub grant: Option<Grant>,
    pub granted_group: Option<String>,
    #[serde(default)]
    pub wip: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePageRequest {
    pub page_id: String,
    pub revision_id: Option<String>,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub page_id: String,
    #[serde(flatten)]
    pub options: RenameOptions,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub page_id: String,
    #[serde(flatten)]
    pub options: DeleteOptions,
}

#[derive(Debug, Deserialize)]
pub struct DuplicateRequest {
    pub page_id: String,
    #[serde(flatten)]
    pub options: DuplicateOptions,
}

#[derive(Debug, Deserialize)]
pub struct RevertRequest {
    pub page_id: String,
    #[serde(flatten)]
    pub options: RevertOptions,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub operation_id: String,
}

#[derive(Debug, Serialize)]
pub struct PageResponse {
    pub page: Page,
}

#[derive(Debug, Serialize)]
pub struct ChildrenResponse {
    pub children: Vec<Page>,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub item: Page,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub info: BTreeMap<String, PageInfo>,
}

#[derive(Debug, Serialize)]
pub struct RevisionsResponse {
    pub revisions: Vec<Revision>,
}

#[derive(Debug, Serialize)]
pub struct OperationsResponse {
    pub operations: Vec<OperationEntry>,
}
