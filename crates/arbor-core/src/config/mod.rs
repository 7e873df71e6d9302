use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::ListPolicy;

mod env;
mod operations;
mod uploader;

pub use operations::{OperationConfig, SubStageDispatch};
pub use uploader::{UploaderConfig, UploaderKind};

const ENV_LIST_INCLUDE_OWNER_RESTRICTED: &str = "ARBOR_LIST_INCLUDE_OWNER_RESTRICTED";
const ENV_LIST_INCLUDE_GROUP_RESTRICTED: &str = "ARBOR_LIST_INCLUDE_GROUP_RESTRICTED";
const ENV_SHORT_BODY_MAX_CHARS: &str = "ARBOR_SHORT_BODY_MAX_CHARS";

const DEFAULT_SHORT_BODY_MAX_CHARS: usize = 200;

/// Settings handed to an [`crate::Arbor`] at construction. Nothing reads the
/// environment after this point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArborConfig {
    pub list_policy: ListPolicy,
    pub operations: OperationConfig,
    pub short_body_max_chars: usize,
    pub uploader: UploaderConfig,
}

impl ArborConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            list_policy: ListPolicy {
                include_owner_restricted: env::read_env_bool(ENV_LIST_INCLUDE_OWNER_RESTRICTED),
                include_group_restricted: env::read_env_bool(ENV_LIST_INCLUDE_GROUP_RESTRICTED),
            },
            operations: OperationConfig::from_env()?,
            short_body_max_chars: env::read_env_usize(
                ENV_SHORT_BODY_MAX_CHARS,
                DEFAULT_SHORT_BODY_MAX_CHARS,
                1,
            ),
            uploader: UploaderConfig::from_env()?,
        })
    }
}

impl Default for ArborConfig {
    fn default() -> Self {
        Self {
            list_policy: ListPolicy::default(),
            operations: OperationConfig::default(),
            short_body_max_chars: DEFAULT_SHORT_BODY_MAX_CHARS,
            uploader: UploaderConfig::default(),
        }
    }
}
