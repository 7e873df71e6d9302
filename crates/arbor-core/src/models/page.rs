use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArborError;

use super::operation::{ActionType, PageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    Public,
    /// Anyone holding the link; never listed or counted in the tree.
    Restricted,
    Owner,
    UserGroup,
}

impl Grant {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Restricted => "restricted",
            Self::Owner => "owner",
            Self::UserGroup => "user_group",
        }
    }
}

impl Display for Grant {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grant {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "restricted" => Ok(Self::Restricted),
            "owner" => Ok(Self::Owner),
            "user_group" => Ok(Self::UserGroup),
            other => Err(ArborError::Validation(format!("unknown grant: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Published,
    Trashed,
}

impl PageStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::Trashed => "trashed",
        }
    }
}

impl FromStr for PageStatus {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" => Ok(Self::Published),
            "trashed" => Ok(Self::Trashed),
            other => Err(ArborError::Validation(format!(
                "unknown page status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub path: String,
    pub parent_id: Option<String>,
    pub descendant_count: u64,
    pub grant: Grant,
    pub granted_user: Option<String>,
    pub granted_group: Option<String>,
    pub creator: Option<String>,
    pub revision_id: Option<String>,
    pub is_empty: bool,
    pub wip: bool,
    pub status: PageStatus,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_data: Option<ProcessData>,
}

impl Page {
    #[must_use]
    pub fn is_trashed(&self) -> bool {
        self.status == PageStatus::Trashed
    }

    /// Counted by ancestors and listed by the tree.
    #[must_use]
    pub fn is_tree_visible(&self) -> bool {
        self.status == PageStatus::Published && !self.is_empty && self.grant != Grant::Restricted
    }

    #[must_use]
    pub fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            page_id: self.id.clone(),
            path: self.path.clone(),
            parent_id: self.parent_id.clone(),
            grant: self.grant,
            granted_user: self.granted_user.clone(),
            granted_group: self.granted_group.clone(),
            creator: self.creator.clone(),
            status: self.status,
            is_empty: self.is_empty,
        }
    }
}

/// Identity the caller acts as. Authentication happens outside this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub group_ids: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            group_ids: Vec::new(),
            is_admin: false,
        }
    }

    #[must_use]
    pub fn guest() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_ids = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn as_admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.id.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageProcessInfo {
    pub is_processable: bool,
}

/// In-progress marker attached to listed pages targeted by a pending rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessData {
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<StageProcessInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<StageProcessInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChildrenTarget {
    Id(String),
    Path(String),
}

impl ChildrenTarget {
    /// Exactly one of `id` / `path` must be present.
    pub fn from_parts(id: Option<String>, path: Option<String>) -> crate::Result<Self> {
        match (id, path) {
            (Some(id), None) => Ok(Self::Id(id)),
            (None, Some(path)) => Ok(Self::Path(path)),
            _ => Err(ArborError::Validation(
                "exactly one of id or path is required".to_string(),
            )),
        }
    }

    pub(crate) fn cache_key(&self) -> String {
        match self {
            Self::Id(id) => format!("id:{id}"),
            Self::Path(path) => format!("path:{path}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageInfoSelector {
    Ids(Vec<String>),
    Path(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageInfoOptions {
    #[serde(default)]
    pub attach_bookmark_count: bool,
    #[serde(default)]
    pub attach_short_body: bool,
}

/// Administrator policy for listing pages the viewer cannot open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListPolicy {
    pub include_owner_restricted: bool,
    pub include_group_restricted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page_id: String,
    pub path: String,
    pub is_empty: bool,
    pub is_movable: bool,
    pub is_deletable: bool,
    pub is_able_to_delete_completely: bool,
    pub is_revertible: bool,
    pub descendant_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmark_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePageOptions {
    pub grant: Grant,
    #[serde(default)]
    pub granted_group: Option<String>,
    #[serde(default)]
    pub wip: bool,
}

impl Default for CreatePageOptions {
    fn default() -> Self {
        Self {
            grant: Grant::Public,
            granted_group: None,
            wip: false,
        }
    }
}
