use std::time::Instant;

use serde_json::json;

use crate::error::{ArborError, Result};
use crate::path::{ROOT_PATH, ancestor_paths, normalize_path};
use crate::state::{descendants, pages};

use super::Arbor;

impl Arbor {
    /// Applies `delta` to every ancestor of the page, and to the page itself
    /// when `include_target` is set, in one statement.
    pub fn adjust_descendant_count(
        &self,
        page_id: &str,
        delta: i64,
        include_target: bool,
    ) -> Result<usize> {
        let started = Instant::now();
        let output = self.state.with_tx(|tx| {
            descendants::adjust_descendant_count(tx, page_id, delta, include_target)
        });
        self.finish_request(
            "descendants.adjust",
            started,
            Some(page_id.to_string()),
            output,
            |updated| Some(json!({ "delta": delta, "updated": updated })),
        )
    }

    /// Recomputes `path` and its ancestors from the rows beneath them.
    pub fn recount_descendants(&self, path: &str) -> Result<usize> {
        let started = Instant::now();
        let output = (|| -> Result<usize> {
            let path = normalize_path(path)?;
            self.state.with_tx(|tx| {
                if pages::page_by_path(tx, &path)?.is_none() {
                    return Err(ArborError::NotFound(format!("page {path}")));
                }
                let mut targets = vec![path.clone()];
                targets.extend(ancestor_paths(&path));
                descendants::recount_descendants(tx, &targets)
            })
        })();
        self.finish_request(
            "descendants.recount",
            started,
            Some(path.to_string()),
            output,
            |updated| Some(json!({ "updated": updated })),
        )
    }

    /// Recomputes every count in the tree.
    pub fn recount_tree(&self) -> Result<usize> {
        let started = Instant::now();
        let output = self
            .state
            .with_tx(|tx| descendants::recount_subtree(tx, ROOT_PATH));
        self.finish_request(
            "descendants.recount_tree",
            started,
            Some(ROOT_PATH.to_string()),
            output,
            |updated| Some(json!({ "updated": updated })),
        )
    }
}
