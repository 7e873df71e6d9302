use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub page_id: String,
    pub body: String,
    pub author: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub page_id: String,
    pub owner: String,
    pub file_name: String,
    pub storage_key: String,
    pub size: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NormalizeOutcome {
    /// The installation never ran the faulty revision migration; nothing was checked.
    NotAffected,
    Healthy,
    /// Page pointer moved to the newest revision owned by the page.
    Relinked { revision_id: String },
    /// Orphaned revision handed back to the page that points at it.
    Reassigned { revision_id: String },
    Unrecoverable,
}
