use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};
use crate::grant::DeletionAuthority;

use super::env::{read_env_u32, read_env_u64, read_env_usize, read_non_empty_env};

const ENV_SUB_STAGE_BATCH_SIZE: &str = "ARBOR_SUB_STAGE_BATCH_SIZE";
const ENV_SUB_STAGE_MAX_ATTEMPTS: &str = "ARBOR_SUB_STAGE_MAX_ATTEMPTS";
const ENV_OPERATION_LEASE_SECS: &str = "ARBOR_OPERATION_LEASE_SECS";
const ENV_SUB_STAGE_DISPATCH: &str = "ARBOR_SUB_STAGE_DISPATCH";
const ENV_COMPLETE_DELETION_AUTHORITY: &str = "ARBOR_COMPLETE_DELETION_AUTHORITY";
const ENV_OPERATION_SWEEP_SECS: &str = "ARBOR_OPERATION_SWEEP_SECS";

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_LEASE_SECS: u64 = 60;
const DEFAULT_SWEEP_SECS: u64 = 30;

/// Where Sub stages run once their Main stage committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubStageDispatch {
    /// One named worker thread per operation.
    #[default]
    Background,
    /// Left pending for the sweep or an explicit `process_operation`.
    Deferred,
}

impl FromStr for SubStageDispatch {
    type Err = ArborError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background" | "thread" => Ok(Self::Background),
            "deferred" | "sweep" => Ok(Self::Deferred),
            other => Err(ArborError::Validation(format!(
                "invalid sub stage dispatch: {other} (expected background|deferred)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub lease_secs: u64,
    pub dispatch: SubStageDispatch,
    pub complete_deletion_authority: DeletionAuthority,
    /// Seconds between the sweeps a long-running server makes; 0 turns
    /// them off.
    pub sweep_interval_secs: u64,
}

impl OperationConfig {
    pub(super) fn from_env() -> Result<Self> {
        Ok(Self {
            batch_size: read_env_usize(ENV_SUB_STAGE_BATCH_SIZE, DEFAULT_BATCH_SIZE, 1),
            max_attempts: read_env_u32(ENV_SUB_STAGE_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS, 1),
            lease_secs: read_env_u64(ENV_OPERATION_LEASE_SECS)
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_LEASE_SECS),
            dispatch: read_non_empty_env(ENV_SUB_STAGE_DISPATCH)
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or_default(),
            complete_deletion_authority: read_non_empty_env(ENV_COMPLETE_DELETION_AUTHORITY)
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or_default(),
            sweep_interval_secs: read_env_u64(ENV_OPERATION_SWEEP_SECS)
                .unwrap_or(DEFAULT_SWEEP_SECS),
        })
    }
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lease_secs: DEFAULT_LEASE_SECS,
            dispatch: SubStageDispatch::Background,
            complete_deletion_authority: DeletionAuthority::AdminAndAuthor,
            sweep_interval_secs: DEFAULT_SWEEP_SECS,
        }
    }
}
