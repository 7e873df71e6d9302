// Public fallible APIs in this crate share one concrete error contract (`ArborError`).
// Repeating per-function `# Errors` boilerplate obscures behavior more than it clarifies.
#![allow(
    clippy::missing_errors_doc,
    reason = "crate-wide fallible API uses one explicit error type; per-item boilerplate would duplicate contract"
)]

pub mod client;
pub(crate) mod coalesce;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod grant;
pub mod models;
pub(crate) mod operation_policy;
pub mod path;
pub mod state;
pub mod uploader;

pub use client::Arbor;
pub use collaborators::{BodySummarizer, BookmarkCounter, LeadingTextSummarizer, NullBookmarkCounter};
pub use config::{ArborConfig, OperationConfig, SubStageDispatch, UploaderConfig, UploaderKind};
pub use error::{ArborError, ErrorPayload, Result, RevisionConflict};
pub use events::{EventBus, PageEvent, PageEventSubscriber};
pub use grant::DeletionAuthority;
pub use uploader::{
    BlobStoreUploader, LocalUploader, ObjectStoreUploader, Uploader, uploader_from_config,
};
