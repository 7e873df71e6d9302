use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArborError;

use super::page::{Grant, PageStatus, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Rename,
    Delete,
    DeleteCompletely,
    Duplicate,
    Revert,
}

impl ActionType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::Delete => "delete",
            Self::DeleteCompletely => "delete_completely",
            Self::Duplicate => "duplicate",
            Self::Revert => "revert",
        }
    }

    /// Request-log operation name.
    #[must_use]
    pub const fn operation_name(self) -> &'static str {
        match self {
            Self::Rename => "page.rename",
            Self::Delete => "page.delete",
            Self::DeleteCompletely => "page.delete_completely",
            Self::Duplicate => "page.duplicate",
            Self::Revert => "page.revert",
        }
    }
}

impl Display for ActionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rename" => Ok(Self::Rename),
            "delete" => Ok(Self::Delete),
            "delete_completely" => Ok(Self::DeleteCompletely),
            "duplicate" => Ok(Self::Duplicate),
            "revert" => Ok(Self::Revert),
            other => Err(ArborError::Validation(format!(
                "unknown action type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStage {
    Main,
    Sub,
}

impl ActionStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Sub => "sub",
        }
    }
}

impl FromStr for ActionStage {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Self::Main),
            "sub" => Ok(Self::Sub),
            other => Err(ArborError::Validation(format!(
                "unknown action stage: {other}"
            ))),
        }
    }
}

/// Persisted lifecycle of one mutation attempt.
///
/// `Requested -> MainInProgress -> MainDone -> SubInProgress -> SubDone`, with
/// `Failed` reachable from every non-terminal state. `SubInProgress` may repeat
/// while a transient failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Requested,
    MainInProgress,
    MainDone,
    SubInProgress,
    SubDone,
    Failed,
}

impl OperationState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::MainInProgress => "main_in_progress",
            Self::MainDone => "main_done",
            Self::SubInProgress => "sub_in_progress",
            Self::SubDone => "sub_done",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn stage(self) -> ActionStage {
        match self {
            Self::Requested | Self::MainInProgress => ActionStage::Main,
            Self::MainDone | Self::SubInProgress | Self::SubDone | Self::Failed => ActionStage::Sub,
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::SubDone | Self::Failed)
    }

    /// The Main stage commits atomically with the `MainDone` transition, so
    /// anything earlier left no tree changes behind.
    #[must_use]
    pub const fn main_committed(self) -> bool {
        matches!(self, Self::MainDone | Self::SubInProgress | Self::SubDone)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (from, Self::Failed) => !from.is_terminal(),
            (Self::Requested, Self::MainInProgress)
            | (Self::MainInProgress, Self::MainDone)
            | (Self::MainDone, Self::SubInProgress)
            | (Self::SubInProgress, Self::SubInProgress)
            | (Self::SubInProgress, Self::SubDone) => true,
            _ => false,
        }
    }
}

impl Display for OperationState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "main_in_progress" => Ok(Self::MainInProgress),
            "main_done" => Ok(Self::MainDone),
            "sub_in_progress" => Ok(Self::SubInProgress),
            "sub_done" => Ok(Self::SubDone),
            "failed" => Ok(Self::Failed),
            other => Err(ArborError::Validation(format!(
                "unknown operation state: {other}"
            ))),
        }
    }
}

/// Target page as it looked when the operation began.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub page_id: String,
    pub path: String,
    pub parent_id: Option<String>,
    pub grant: Grant,
    pub granted_user: Option<String>,
    pub granted_group: Option<String>,
    pub creator: Option<String>,
    pub status: PageStatus,
    pub is_empty: bool,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOptions {
    #[serde(default = "default_true")]
    pub is_recursively: bool,
    #[serde(default)]
    pub only_duplicate_user_related_resources: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicated_page_id: Option<String>,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            is_recursively: true,
            only_duplicate_user_related_resources: false,
            duplicated_page_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationEntry {
    pub id: String,
    pub action_type: ActionType,
    pub action_stage: ActionStage,
    pub state: OperationState,
    pub page: PageSnapshot,
    pub from_path: String,
    pub to_path: Option<String>,
    pub options: OperationOptions,
    pub user: User,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub progress_cursor: Option<String>,
    pub locked_until: String,
    /// Instance that took the current lease. Cleared while a retry waits
    /// out its backoff.
    pub locked_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewOperation {
    pub action_type: ActionType,
    pub page: PageSnapshot,
    pub from_path: String,
    pub to_path: Option<String>,
    pub options: OperationOptions,
    pub user: User,
    pub lease_until: String,
    pub lease_owner: String,
}

/// Returned by every mutation once its Main stage committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub operation_id: String,
    pub action_type: ActionType,
    pub page_id: String,
    pub from_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameOptions {
    pub new_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    #[serde(default = "default_true")]
    pub is_recursively: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            is_recursively: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateOptions {
    pub new_path: String,
    #[serde(default = "default_true")]
    pub is_recursively: bool,
    #[serde(default)]
    pub only_duplicate_user_related_resources: bool,
}

impl DuplicateOptions {
    pub fn new(new_path: impl Into<String>) -> Self {
        Self {
            new_path: new_path.into(),
            is_recursively: true,
            only_duplicate_user_related_resources: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertOptions {
    #[serde(default = "default_true")]
    pub is_recursively: bool,
}

impl Default for RevertOptions {
    fn default() -> Self {
        Self {
            is_recursively: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubStageBudget {
    #[default]
    Unbounded,
    /// Stop after this many descendants, leaving the entry pending.
    Pages(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubStageOutcome {
    Completed { processed: usize },
    Interrupted { processed: usize },
    /// Another worker holds the lease, or a retry is scheduled for later.
    Busy,
    Retrying { attempt: u32, next_attempt_at: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeReport {
    /// Leases left behind by other instances and expired by this sweep.
    pub reclaimed: usize,
    pub scanned: usize,
    pub discarded: usize,
    pub completed: usize,
    pub interrupted: usize,
    pub retrying: usize,
    pub failed: usize,
    pub busy: usize,
}
