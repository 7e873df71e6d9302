use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use serde::de::DeserializeOwned;

use crate::error::{ArborError, Result};
use crate::models::RequestLogEntry;
use crate::state::now_rfc3339;

use super::{Arbor, LOG_DIR_NAME};

const REQUEST_LOG_FILE_NAME: &str = "requests.jsonl";

impl Arbor {
    fn request_log_path(&self) -> PathBuf {
        self.root.join(LOG_DIR_NAME).join(REQUEST_LOG_FILE_NAME)
    }

    pub(super) fn try_log_request(&self, entry: &RequestLogEntry) {
        let Ok(serialized) = serde_json::to_string(entry) else {
            return;
        };
        let path = self.request_log_path();
        if let Some(parent) = path.parent()
            && fs::create_dir_all(parent).is_err()
        {
            return;
        }
        let mut line = serialized;
        line.push('\n');
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
            let _ = file.write_all(line.as_bytes());
        }
    }

    pub(super) fn log_request_status(
        &self,
        request_id: String,
        operation: &str,
        status: &str,
        started: Instant,
        target_path: Option<String>,
        details: Option<serde_json::Value>,
    ) {
        self.try_log_request(&RequestLogEntry {
            request_id,
            operation: operation.to_string(),
            status: status.to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: now_rfc3339(),
            target_path,
            error_code: None,
            error_message: None,
            details,
        });
    }

    pub(super) fn log_request_error(
        &self,
        request_id: String,
        operation: &str,
        started: Instant,
        target_path: Option<String>,
        err: &ArborError,
        details: Option<serde_json::Value>,
    ) {
        self.try_log_request(&RequestLogEntry {
            request_id,
            operation: operation.to_string(),
            status: "error".to_string(),
            latency_ms: started.elapsed().as_millis(),
            created_at: now_rfc3339(),
            target_path,
            error_code: Some(err.code().to_string()),
            error_message: Some(err.to_string()),
            details,
        });
    }

    /// Logs `output` under `operation` and hands it back unchanged.
    pub(super) fn finish_request<T>(
        &self,
        operation: &str,
        started: Instant,
        target_path: Option<String>,
        output: Result<T>,
        details: impl FnOnce(&T) -> Option<serde_json::Value>,
    ) -> Result<T> {
        let request_id = uuid::Uuid::new_v4().to_string();
        match output {
            Ok(value) => {
                self.log_request_status(
                    request_id,
                    operation,
                    "ok",
                    started,
                    target_path,
                    details(&value),
                );
                Ok(value)
            }
            Err(err) => {
                let details = match &err {
                    ArborError::RevisionConflict(conflict) => {
                        serde_json::to_value(conflict.as_ref()).ok()
                    }
                    _ => None,
                };
                self.log_request_error(request_id, operation, started, target_path, &err, details);
                Err(err)
            }
        }
    }

    /// Newest entries first. Lines that no longer parse are skipped.
    pub fn list_request_logs(&self, limit: usize) -> Result<Vec<RequestLogEntry>> {
        let path = self.request_log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        let (mut entries, skipped) = parse_jsonl_tolerant::<RequestLogEntry>(&raw);
        if skipped > 0 {
            tracing::warn!(
                target: "arbor::request_log",
                skipped,
                path = %path.display(),
                "request log contains unreadable lines"
            );
        }
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

fn parse_jsonl_tolerant<T: DeserializeOwned>(raw: &str) -> (Vec<T>, usize) {
    let mut items = Vec::new();
    let mut skipped = 0usize;
    for line in raw.lines().filter(|line| !line.trim().is_empty()) {
        match serde_json::from_str::<T>(line) {
            Ok(item) => items.push(item),
            Err(_) => skipped += 1,
        }
    }
    (items, skipped)
}
