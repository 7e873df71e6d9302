use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

use crate::coalesce::RequestCoalescer;
use crate::collaborators::{
    BodySummarizer, BookmarkCounter, LeadingTextSummarizer, NullBookmarkCounter,
};
use crate::config::ArborConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::models::{Grant, Page, PageStatus};
use crate::path::ROOT_PATH;
use crate::state::{SqliteStore, now_rfc3339, pages};
use crate::uploader::{Uploader, uploader_from_config};

mod descendant_service;
mod mutation_service;
mod mutation_stages;
mod page_service;
mod request_log_service;
mod resume_service;
mod revision_service;
mod sub_stage_service;
mod tree_query_service;
mod worker;

const STATE_FILE_NAME: &str = ".arbor_state.sqlite3";
const LOG_DIR_NAME: &str = "logs";

/// Entry point to one page tree. Cheap to clone; clones share the store,
/// collaborators, in-flight read table and worker handles.
///
/// Each `with_config` call is one instance: ledger leases are tagged with
/// its id, and its first sweep takes over leases left by other instances.
#[derive(Clone)]
pub struct Arbor {
    root: PathBuf,
    pub state: SqliteStore,
    config: Arc<ArborConfig>,
    uploader: Arc<dyn Uploader>,
    events: EventBus,
    bookmarks: Arc<dyn BookmarkCounter>,
    summarizer: Arc<dyn BodySummarizer>,
    page_reads: RequestCoalescer<Page>,
    listing_reads: RequestCoalescer<Vec<Page>>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    instance_id: Arc<str>,
    leases_reclaimed: Arc<AtomicBool>,
    revision_migration_affected: Arc<OnceLock<bool>>,
}

impl std::fmt::Debug for Arbor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbor")
            .field("root", &self.root)
            .field("instance_id", &self.instance_id)
            .field("uploader", &self.uploader.kind())
            .finish_non_exhaustive()
    }
}

impl Arbor {
    pub fn new(root_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_config(root_dir, ArborConfig::from_env()?)
    }

    pub fn with_config(root_dir: impl Into<PathBuf>, config: ArborConfig) -> Result<Self> {
        let root = root_dir.into();
        fs::create_dir_all(&root)?;
        let state = SqliteStore::open(root.join(STATE_FILE_NAME))?;
        let uploader = uploader_from_config(&config.uploader, &root)?;

        Ok(Self {
            root,
            state,
            config: Arc::new(config),
            uploader,
            events: EventBus::default(),
            bookmarks: Arc::new(NullBookmarkCounter),
            summarizer: Arc::new(LeadingTextSummarizer),
            page_reads: RequestCoalescer::default(),
            listing_reads: RequestCoalescer::default(),
            workers: Arc::new(Mutex::new(Vec::new())),
            instance_id: Arc::from(uuid::Uuid::new_v4().to_string()),
            leases_reclaimed: Arc::new(AtomicBool::new(false)),
            revision_migration_affected: Arc::new(OnceLock::new()),
        })
    }

    #[must_use]
    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = uploader;
        self
    }

    #[must_use]
    pub fn with_bookmark_counter(mut self, bookmarks: Arc<dyn BookmarkCounter>) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn BodySummarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// Owner tag written into the ledger leases this instance takes.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn config(&self) -> &ArborConfig {
        &self.config
    }

    /// Subscribe here to observe page and operation events.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Creates the log directory and the root page. Safe to repeat.
    pub fn initialize(&self) -> Result<()> {
        fs::create_dir_all(self.root.join(LOG_DIR_NAME))?;
        self.state.with_tx(|tx| {
            if pages::page_by_path(tx, ROOT_PATH)?.is_some() {
                return Ok(());
            }
            let now = now_rfc3339();
            pages::insert_page(
                tx,
                &Page {
                    id: uuid::Uuid::new_v4().to_string(),
                    path: ROOT_PATH.to_string(),
                    parent_id: None,
                    descendant_count: 0,
                    grant: Grant::Public,
                    granted_user: None,
                    granted_group: None,
                    creator: None,
                    revision_id: None,
                    is_empty: false,
                    wip: false,
                    status: PageStatus::Published,
                    created_at: now.clone(),
                    updated_at: now,
                    process_data: None,
                },
            )
        })?;
        tracing::info!(target: "arbor", root = %self.root.display(), "page tree initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
