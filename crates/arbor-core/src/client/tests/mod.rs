use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tempfile::{TempDir, tempdir};

use crate::config::{ArborConfig, SubStageDispatch, UploaderKind};
use crate::error::{ArborError, Result};
use crate::models::{ChildrenTarget, CreatePageOptions, Page, User};
use crate::uploader::{LocalUploader, Uploader};

use super::Arbor;

mod request_logs;
mod resume_and_retry;

fn deferred_config() -> ArborConfig {
    let mut config = ArborConfig::default();
    config.operations.dispatch = SubStageDispatch::Deferred;
    config
}

fn open_app(config: ArborConfig) -> (TempDir, Arbor) {
    let temp = tempdir().expect("tempdir");
    let app = Arbor::with_config(temp.path(), config).expect("app new");
    app.initialize().expect("init failed");
    (temp, app)
}

fn open_deferred() -> (TempDir, Arbor) {
    open_app(deferred_config())
}

fn alice() -> User {
    User::new("alice", "Alice")
}

fn bob() -> User {
    User::new("bob", "Bob")
}

fn admin() -> User {
    User::new("root-admin", "Admin").as_admin()
}

fn create(app: &Arbor, path: &str) -> Page {
    app.create_page(path, &format!("# {path}"), &alice(), &CreatePageOptions::default())
        .expect("create page")
}

fn page_at(app: &Arbor, path: &str) -> Option<Page> {
    match app.item_by_path(path, &admin()) {
        Ok(page) => Some(page),
        Err(ArborError::NotFound(_)) => None,
        Err(err) => panic!("lookup {path} failed: {err}"),
    }
}

fn count_at(app: &Arbor, path: &str) -> u64 {
    page_at(app, path)
        .unwrap_or_else(|| panic!("{path} should exist"))
        .descendant_count
}

fn child_paths(app: &Arbor, path: &str, viewer: &User) -> Vec<String> {
    app.children(&ChildrenTarget::Path(path.to_string()), viewer)
        .expect("children")
        .into_iter()
        .map(|page| page.path)
        .collect()
}

/// Local uploader whose `copy` can be switched to fail with a transient
/// error.
struct FlakyUploader {
    inner: LocalUploader,
    failing: AtomicBool,
    copies: AtomicUsize,
}

impl FlakyUploader {
    fn new(temp: &TempDir) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalUploader::new(temp.path().join("flaky-uploads")),
            failing: AtomicBool::new(false),
            copies: AtomicUsize::new(0),
        })
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Uploader for FlakyUploader {
    fn kind(&self) -> UploaderKind {
        UploaderKind::Local
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.inner.save(key, bytes)
    }

    fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ArborError::Transient(format!(
                "object store timed out copying {from_key}"
            )));
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(from_key, to_key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }
}
